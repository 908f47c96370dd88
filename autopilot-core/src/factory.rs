//! Keyed registry of per-PR managers.
//!
//! The registry is the only shared mutable state in the core. Each entry is
//! wrapped in its own mutex so that two refresh cycles for the same PR can
//! never run their analysis concurrently, while different PRs proceed
//! independently.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::manager::{
    Collaborators, EntityManager, ManagerError, ManagerOptions, ManagerSettings, StatusSnapshot,
};
use crate::state_machine::ObservedEventKind;

/// Identifies a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PrKey {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid PR key {0:?}: expected owner/repo#number")]
pub struct InvalidPrKey(pub String);

impl FromStr for PrKey {
    type Err = InvalidPrKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPrKey(s.to_string());
        let (path, number) = s.trim().rsplit_once('#').ok_or_else(invalid)?;
        let (owner, repo) = path.split_once('/').ok_or_else(invalid)?;
        let number = number.parse::<u64>().map_err(|_| invalid())?;

        let valid_segment = |segment: &str| !segment.is_empty() && !segment.contains('/');
        if !valid_segment(owner) || !valid_segment(repo) || number == 0 {
            return Err(invalid());
        }

        Ok(Self::new(owner, repo, number))
    }
}

type SharedManager = Arc<Mutex<EntityManager>>;

/// Lazily creates one [`EntityManager`] per PR and keeps it until
/// [`ManagerFactory::cleanup`] is called.
pub struct ManagerFactory {
    managers: RwLock<HashMap<PrKey, SharedManager>>,
    collaborators: Collaborators,
    settings: Arc<ManagerSettings>,
}

impl ManagerFactory {
    pub fn new(collaborators: Collaborators, settings: ManagerSettings) -> Self {
        Self {
            managers: RwLock::new(HashMap::new()),
            collaborators,
            settings: Arc::new(settings),
        }
    }

    pub async fn get_or_create(&self, key: &PrKey) -> SharedManager {
        if let Some(manager) = self.managers.read().await.get(key) {
            return Arc::clone(manager);
        }

        let mut managers = self.managers.write().await;
        let manager = managers.entry(key.clone()).or_insert_with(|| {
            info!("Creating manager for {}", key);
            Arc::new(Mutex::new(EntityManager::new(
                key.clone(),
                self.collaborators.clone(),
                Arc::clone(&self.settings),
            )))
        });
        Arc::clone(manager)
    }

    pub async fn get(&self, key: &PrKey) -> Option<SharedManager> {
        self.managers.read().await.get(key).cloned()
    }

    /// Feed a raw observed event for the PR identified by `key`
    /// (`owner/repo#number`).
    pub async fn handle_observed_event(
        &self,
        key: &str,
        kind: &str,
        timestamp: DateTime<Utc>,
        options: &ManagerOptions,
    ) -> Result<StatusSnapshot, ManagerError> {
        let key: PrKey = key.parse()?;
        self.process(&key, kind, timestamp, options).await
    }

    pub async fn process(
        &self,
        key: &PrKey,
        kind: &str,
        timestamp: DateTime<Utc>,
        options: &ManagerOptions,
    ) -> Result<StatusSnapshot, ManagerError> {
        // Unknown kinds must not create a manager as a side effect.
        let kind: ObservedEventKind = kind.parse()?;
        let manager = self.get_or_create(key).await;
        let mut manager = manager.lock().await;
        Ok(manager.handle_event(kind, timestamp, options).await)
    }

    /// Run a refresh cycle for an existing manager without a new event.
    pub async fn refresh(&self, key: &PrKey, options: &ManagerOptions) -> Option<StatusSnapshot> {
        let manager = self.get(key).await?;
        let mut manager = manager.lock().await;
        Some(manager.refresh(options).await)
    }

    pub async fn reset(&self, key: &PrKey) -> Option<StatusSnapshot> {
        let manager = self.get(key).await?;
        let mut manager = manager.lock().await;
        Some(manager.reset().await)
    }

    /// Drop the manager for `key`. Returns false if there was none.
    pub async fn cleanup(&self, key: &PrKey) -> bool {
        let removed = self.managers.write().await.remove(key).is_some();
        if removed {
            info!("Removed manager for {}", key);
        } else {
            debug!("No manager to remove for {}", key);
        }
        removed
    }

    pub async fn keys(&self) -> Vec<PrKey> {
        let mut keys: Vec<PrKey> = self.managers.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.managers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.managers.read().await.is_empty()
    }

    /// Current status of every tracked PR, ordered by key.
    pub async fn snapshots(&self) -> Vec<StatusSnapshot> {
        let mut managers: Vec<(PrKey, SharedManager)> = self
            .managers
            .read()
            .await
            .iter()
            .map(|(key, manager)| (key.clone(), Arc::clone(manager)))
            .collect();
        managers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut snapshots = Vec::with_capacity(managers.len());
        for (_, manager) in managers {
            snapshots.push(manager.lock().await.snapshot());
        }
        snapshots
    }
}
