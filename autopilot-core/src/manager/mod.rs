//! Per-PR manager.
//!
//! An [`EntityManager`] owns one [`StateMachine`] and is the only place
//! where the core performs I/O. It maps raw observed signals onto machine
//! events, executes the effects the machine records, and polls CI on every
//! refresh cycle.
//!
//! Collaborator failures never escape a cycle. They are logged through the
//! [`StatusSink`], the machine is rolled back to the checkpoint taken before
//! the failed step, and the next cycle retries from the same state.

mod ci_poll;
mod fix_request;
mod rerun;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::debug;

use crate::checks::{collect_failed_checks, IgnoreList, WorkflowCheckResult};
use crate::factory::{InvalidPrKey, PrKey};
use crate::forge::{
    CommitRef, ForgeClient, LogSummarizer, NeverPaused, PauseOracle, StatusSink, TracingSink,
};
use crate::state_machine::{
    ContextUpdate, CopilotEvent, CopilotState, Effect, EffectQueue, LogLevel, MachineCheckpoint,
    ObservedEventKind, StateContext, StateInfo, StateMachine, UnknownEventKind,
    DEFAULT_MAX_SESSIONS,
};

pub use fix_request::{
    render_fix_request, render_nudge, FailureCategory, FIX_REQUEST_MARKER, NUDGE_MARKER,
};
pub use rerun::{classify_rerun_error, RerunFailure};

pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AGENT_MENTION: &str = "@copilot";

/// Errors returned to callers of the public entry points.
///
/// Each describes a problem with one call for one PR only.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    UnknownEventKind(#[from] UnknownEventKind),
    #[error(transparent)]
    InvalidKey(#[from] InvalidPrKey),
}

/// The external services a manager calls.
#[derive(Clone)]
pub struct Collaborators {
    pub forge: Arc<dyn ForgeClient>,
    pub summarizer: Arc<dyn LogSummarizer>,
    pub pause: Arc<dyn PauseOracle>,
    pub sink: Arc<dyn StatusSink>,
}

impl Collaborators {
    /// Collaborators that never pause and log through `tracing`.
    pub fn new(forge: Arc<dyn ForgeClient>, summarizer: Arc<dyn LogSummarizer>) -> Self {
        Self {
            forge,
            summarizer,
            pause: Arc::new(NeverPaused),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_pause(mut self, pause: Arc<dyn PauseOracle>) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Settings shared by every manager a factory creates.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Upper bound for every collaborator call.
    pub api_timeout: Duration,
    pub ignore_list: IgnoreList,
    /// How comments address the agent.
    pub agent_mention: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            api_timeout: DEFAULT_API_TIMEOUT,
            ignore_list: IgnoreList::default(),
            agent_mention: DEFAULT_AGENT_MENTION.to_string(),
        }
    }
}

/// Per-call toggles, refreshed into the context before every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub auto_fix_enabled: bool,
    pub auto_approve_enabled: bool,
    pub username: Option<String>,
    pub max_sessions: u32,
    pub nudge_on_error: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            auto_fix_enabled: true,
            auto_approve_enabled: false,
            username: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            nudge_on_error: false,
        }
    }
}

impl ManagerOptions {
    fn context_update(&self) -> ContextUpdate {
        ContextUpdate {
            auto_fix_enabled: Some(self.auto_fix_enabled),
            auto_approve_enabled: Some(self.auto_approve_enabled),
            username: Some(self.username.clone()),
            max_sessions: Some(self.max_sessions),
            ..Default::default()
        }
    }
}

/// Why automated actions were withheld for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseScope {
    Global,
    Entity,
    /// The pause oracle could not be consulted.
    Unavailable,
}

impl PauseScope {
    fn describe(&self) -> &'static str {
        match self {
            Self::Global => "Automation is paused globally; skipping automated actions",
            Self::Entity => "Automation is paused for this PR; skipping automated actions",
            Self::Unavailable => "Pause state unavailable; skipping automated actions",
        }
    }
}

/// What a caller sees after each call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub key: String,
    pub state: CopilotState,
    pub info: StateInfo,
    pub session_count: u32,
    pub max_sessions: u32,
    pub total_session_secs: u64,
    pub running_workflow_run_ids: Vec<u64>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub paused: Option<PauseScope>,
}

/// Drives the state machine of one PR against the collaborators.
pub struct EntityManager {
    key: PrKey,
    machine: StateMachine<EffectQueue>,
    collaborators: Collaborators,
    settings: Arc<ManagerSettings>,
    nudge_on_error: bool,
    paused: Option<PauseScope>,
}

impl EntityManager {
    pub fn new(key: PrKey, collaborators: Collaborators, settings: Arc<ManagerSettings>) -> Self {
        Self {
            key,
            machine: StateMachine::new(EffectQueue::new()),
            collaborators,
            settings,
            nudge_on_error: false,
            paused: None,
        }
    }

    pub fn key(&self) -> &PrKey {
        &self.key
    }

    pub fn state(&self) -> CopilotState {
        self.machine.current_state()
    }

    pub fn context(&self) -> &StateContext {
        self.machine.context()
    }

    /// Feed a raw observed event such as `work_finished`, then run a
    /// refresh cycle.
    pub async fn handle_observed_event(
        &mut self,
        kind: &str,
        timestamp: DateTime<Utc>,
        options: &ManagerOptions,
    ) -> Result<StatusSnapshot, ManagerError> {
        let kind: ObservedEventKind = kind.parse()?;
        Ok(self.handle_event(kind, timestamp, options).await)
    }

    pub async fn handle_event(
        &mut self,
        kind: ObservedEventKind,
        timestamp: DateTime<Utc>,
        options: &ManagerOptions,
    ) -> StatusSnapshot {
        self.apply_options(options);
        debug!("[{}] observed {}", self.key, kind.as_str());

        let checkpoint = self.machine.checkpoint();
        if let Err(err) = self
            .dispatch(kind.to_event(), Some(ContextUpdate::at(timestamp)))
            .await
        {
            self.recover(checkpoint, "Handling observed event", &err);
        }

        self.run_cycle().await;
        self.snapshot()
    }

    /// Run a refresh cycle without a new event.
    pub async fn refresh(&mut self, options: &ManagerOptions) -> StatusSnapshot {
        self.apply_options(options);
        self.run_cycle().await;
        self.snapshot()
    }

    /// Operator reset back to `IDLE`.
    pub async fn reset(&mut self) -> StatusSnapshot {
        self.log(LogLevel::Info, "Resetting automation state");
        let checkpoint = self.machine.checkpoint();
        if let Err(err) = self.dispatch(CopilotEvent::Reset, None).await {
            self.recover(checkpoint, "Reset", &err);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let ctx = self.machine.context();
        StatusSnapshot {
            key: self.key.to_string(),
            state: self.machine.current_state(),
            info: self.machine.state_info(),
            session_count: ctx.session_count,
            max_sessions: ctx.max_sessions,
            total_session_secs: ctx.total_session_time.as_secs(),
            running_workflow_run_ids: ctx.running_workflow_run_ids.iter().copied().collect(),
            last_event_timestamp: ctx.last_event_timestamp,
            paused: self.paused,
        }
    }

    fn apply_options(&mut self, options: &ManagerOptions) {
        self.machine.update_context(options.context_update());
        self.nudge_on_error = options.nudge_on_error;
    }

    /// One refresh cycle. Which steps run depends on the state at the start
    /// of the cycle and after each step.
    async fn run_cycle(&mut self) {
        let initial = self.machine.current_state();
        self.paused = self.pause_scope().await;
        if let Some(scope) = self.paused {
            self.log(LogLevel::Info, scope.describe());
        }
        let paused = self.paused.is_some();

        if initial == CopilotState::WaitingForFeedback && !paused {
            self.post_work_analysis().await;
        }

        if matches!(
            initial,
            CopilotState::ReadyForRerun | CopilotState::CiRunning
        ) {
            self.check_ci_status().await;
        }

        if self.machine.current_state() == CopilotState::ReadyForRerun
            && self.machine.should_trigger_rerun()
            && !paused
        {
            let checkpoint = self.machine.checkpoint();
            if let Err(err) = self.rerun_workflows().await {
                self.recover(checkpoint, "Re-running workflows", &err);
            }
        }

        // Only inspect jobs of runs that were already running when the
        // cycle began; freshly re-run runs still report the old attempt.
        if initial == CopilotState::CiRunning
            && self.machine.current_state() == CopilotState::CiRunning
            && !paused
        {
            self.check_job_failures().await;
        }

        if self.machine.current_state() == CopilotState::Error && self.nudge_on_error && !paused {
            if let Err(err) = self.nudge().await {
                self.log(LogLevel::Warn, &format!("Nudge failed: {:#}", err));
            }
        }
    }

    async fn pause_scope(&self) -> Option<PauseScope> {
        let pause = Arc::clone(&self.collaborators.pause);

        match self.bounded("Global pause check", pause.is_globally_paused()).await {
            Ok(true) => return Some(PauseScope::Global),
            Ok(false) => {}
            Err(err) => {
                self.log(LogLevel::Warn, &format!("{:#}", err));
                return Some(PauseScope::Unavailable);
            }
        }

        match self
            .bounded("PR pause check", pause.is_entity_paused(&self.key))
            .await
        {
            Ok(true) => Some(PauseScope::Entity),
            Ok(false) => None,
            Err(err) => {
                self.log(LogLevel::Warn, &format!("{:#}", err));
                Some(PauseScope::Unavailable)
            }
        }
    }

    /// Look at CI after the agent finished and feed the verdict to the
    /// machine.
    async fn post_work_analysis(&mut self) {
        let checkpoint = self.machine.checkpoint();
        if let Err(err) = self.analyse_finished_work().await {
            self.recover(checkpoint, "Post-work analysis", &err);
        }
    }

    async fn analyse_finished_work(&mut self) -> Result<()> {
        let commit = self.head_commit().await?;
        let since = self.machine.context().last_event_timestamp;
        let result = self.failed_checks(&commit, since).await?;

        if result.has_failures() {
            self.log(
                LogLevel::Info,
                &format!(
                    "Found {} failed check(s): {}",
                    result.failed_checks.len(),
                    result.failed_checks.join(", ")
                ),
            );
            let update = ContextUpdate {
                has_failed_checks: Some(true),
                pending_workflow_run_ids: Some(result.failed_workflow_run_ids),
                ..Default::default()
            };
            self.dispatch(CopilotEvent::FailedChecksDetected, Some(update))
                .await?;
        } else {
            let update = ContextUpdate {
                has_failed_checks: Some(false),
                pending_workflow_run_ids: Some(BTreeSet::new()),
                ..Default::default()
            };
            self.dispatch(CopilotEvent::NoFailedChecks, Some(update))
                .await?;
        }

        if self.machine.should_trigger_rerun() {
            self.rerun_workflows().await?;
        }
        Ok(())
    }

    /// Fire the re-run trigger. If that left nothing running, CI is already
    /// over and the entity goes straight back to idle.
    async fn rerun_workflows(&mut self) -> Result<()> {
        if !self
            .dispatch(CopilotEvent::WorkflowRerunTriggered, None)
            .await?
        {
            return Ok(());
        }

        if self.machine.current_state() == CopilotState::CiRunning
            && self.machine.context().running_workflow_run_ids.is_empty()
        {
            self.log(
                LogLevel::Info,
                "No workflow runs were started; CI is already complete",
            );
            self.dispatch(
                CopilotEvent::CiCompleted,
                Some(ContextUpdate::running(BTreeSet::new())),
            )
            .await?;
        }
        Ok(())
    }

    /// Transition and execute whatever the transition asked for.
    async fn dispatch(&mut self, event: CopilotEvent, update: Option<ContextUpdate>) -> Result<bool> {
        let fired = self.machine.transition(event, update);
        self.run_effects().await?;
        Ok(fired)
    }

    async fn run_effects(&mut self) -> Result<()> {
        let effects = self.machine.hooks_mut().drain();
        for effect in effects {
            match effect {
                Effect::RequestFix => self.request_fix().await?,
                Effect::TriggerRerun => self.trigger_rerun().await?,
                Effect::StatusChanged { state, info } => {
                    self.collaborators
                        .sink
                        .on_status_change(&self.key, state, &info)
                }
                Effect::Log { level, message } => self.log(level, &message),
            }
        }
        Ok(())
    }

    /// Roll back after a failed step and report it.
    fn recover(&mut self, checkpoint: MachineCheckpoint, action: &str, err: &anyhow::Error) {
        self.log(
            LogLevel::Warn,
            &format!("{} failed, will retry next cycle: {:#}", action, err),
        );
        self.machine.restore(checkpoint);

        // Actions queued by the failed transition are dropped with it.
        let effects = self.machine.hooks_mut().drain();
        for effect in effects {
            match effect {
                Effect::StatusChanged { state, info } => {
                    self.collaborators
                        .sink
                        .on_status_change(&self.key, state, &info)
                }
                Effect::Log { level, message } => self.log(level, &message),
                Effect::RequestFix | Effect::TriggerRerun => {}
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.collaborators.sink.on_log(&self.key, level, message);
    }

    /// Bound a collaborator call by the configured timeout.
    async fn bounded<T, F>(&self, action: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.settings.api_timeout, call).await {
            Ok(result) => result.with_context(|| format!("{} failed for {}", action, self.key)),
            Err(_) => Err(anyhow!(
                "{} timed out after {:?} for {}",
                action,
                self.settings.api_timeout,
                self.key
            )),
        }
    }

    async fn head_commit(&self) -> Result<CommitRef> {
        let forge = Arc::clone(&self.collaborators.forge);
        let pr = self
            .bounded("Fetching pull request", forge.fetch_pull_request(&self.key))
            .await?;
        Ok(CommitRef::for_pr(&self.key, pr.head_sha))
    }

    async fn failed_checks(
        &self,
        commit: &CommitRef,
        since: Option<DateTime<Utc>>,
    ) -> Result<WorkflowCheckResult> {
        let forge = Arc::clone(&self.collaborators.forge);
        self.bounded(
            "Collecting failed checks",
            collect_failed_checks(forge.as_ref(), commit, since, &self.settings.ignore_list),
        )
        .await
    }
}
