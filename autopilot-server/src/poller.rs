//! Periodic refresh of every monitored pull request.
//!
//! Each cycle reads the PR and its latest agent event from GitHub. A new
//! event is fed to the PR's manager; otherwise the manager just runs a
//! refresh cycle so CI progress is still picked up. Closed PRs lose their
//! manager.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info};

use autopilot_core::{ForgeClient, PrKey, StatusSnapshot};

use crate::github::AgentEvent;
use crate::AppState;

/// Last agent event fed per PR, so the same event is not replayed.
#[derive(Debug, Default)]
pub struct SeenEvents {
    last: HashMap<PrKey, AgentEvent>,
}

impl SeenEvents {
    /// Record `event` for `key`. Returns true if it differs from the last
    /// one recorded.
    pub fn observe(&mut self, key: &PrKey, event: AgentEvent) -> bool {
        match self.last.get(key) {
            Some(previous) if *previous == event => false,
            _ => {
                self.last.insert(key.clone(), event);
                true
            }
        }
    }

    pub fn forget(&mut self, key: &PrKey) {
        self.last.remove(key);
    }
}

pub async fn refresh_loop(state: Arc<AppState>) {
    let mut interval = interval(state.config.poll_interval);

    loop {
        interval.tick().await;

        if let Err(e) = refresh_all(&state).await {
            error!("Error refreshing pull requests: {:#}", e);
        }
    }
}

async fn refresh_all(state: &AppState) -> Result<()> {
    debug!("Refreshing {} pull request(s)", state.config.prs.len());

    for key in &state.config.prs {
        match refresh_pr(state, key).await {
            Ok(Some(snapshot)) => debug!(
                "{} is {} ({}/{} sessions)",
                key, snapshot.state, snapshot.session_count, snapshot.max_sessions
            ),
            Ok(None) => {}
            Err(e) => error!("Error refreshing {}: {:#}", key, e),
        }
    }
    Ok(())
}

async fn refresh_pr(state: &AppState, key: &PrKey) -> Result<Option<StatusSnapshot>> {
    let pr = state
        .github
        .fetch_pull_request(key)
        .await
        .with_context(|| format!("Failed to fetch {}", key))?;

    if !pr.is_open {
        state.seen_events.lock().await.forget(key);
        if state.factory.cleanup(key).await {
            info!("{} is closed; stopped tracking it", key);
        }
        return Ok(None);
    }

    let latest = state
        .github
        .latest_agent_event(key)
        .await
        .with_context(|| format!("Failed to read the timeline of {}", key))?;

    let options = state.config.manager_options();
    let fresh = match latest {
        Some(event) => state
            .seen_events
            .lock()
            .await
            .observe(key, event)
            .then_some(event),
        None => None,
    };

    match fresh {
        Some(event) => {
            info!("{}: agent event {}", key, event.kind.as_str());
            let snapshot = state
                .factory
                .process(key, event.kind.as_str(), event.created_at, &options)
                .await?;
            Ok(Some(snapshot))
        }
        None => Ok(state.factory.refresh(key, &options).await),
    }
}
