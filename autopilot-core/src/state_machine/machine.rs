//! The state machine instance for one PR.

use tracing::{debug, info, warn};

use super::effect::{LogLevel, NoopHooks, TransitionHooks};
use super::event::CopilotEvent;
use super::state::{ContextUpdate, CopilotState, StateContext, StateInfo};
use super::transition::{find_transition, RuleAction};

/// State and context captured so a failed side effect can be rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineCheckpoint {
    state: CopilotState,
    context: StateContext,
}

impl MachineCheckpoint {
    pub fn state(&self) -> CopilotState {
        self.state
    }
}

/// Guarded finite-state machine over [`CopilotState`] with an attached
/// [`StateContext`].
///
/// `transition` is synchronous and never performs I/O; anything with a side
/// effect is handed to the hooks.
#[derive(Debug)]
pub struct StateMachine<H = NoopHooks> {
    state: CopilotState,
    context: StateContext,
    hooks: H,
}

impl Default for StateMachine<NoopHooks> {
    fn default() -> Self {
        Self::new(NoopHooks)
    }
}

impl<H: TransitionHooks> StateMachine<H> {
    pub fn new(hooks: H) -> Self {
        Self::with_context(StateContext::default(), hooks)
    }

    pub fn with_context(context: StateContext, hooks: H) -> Self {
        Self {
            state: CopilotState::Idle,
            context,
            hooks,
        }
    }

    pub fn current_state(&self) -> CopilotState {
        self.state
    }

    pub fn context(&self) -> &StateContext {
        &self.context
    }

    /// Merge a partial update into the context without transitioning.
    pub fn update_context(&mut self, update: ContextUpdate) {
        self.context.apply(update);
    }

    /// Apply `update` (if any), then fire the first matching rule for `event`.
    ///
    /// Returns false, leaving the state untouched, when no rule matches.
    pub fn transition(&mut self, event: CopilotEvent, update: Option<ContextUpdate>) -> bool {
        if let Some(update) = update {
            self.update_context(update);
        }

        let Some(rule) = find_transition(self.state, event, &self.context) else {
            let message = format!("Ignoring {} in state {}", event, self.state);
            debug!("{}", message);
            self.hooks.on_log(LogLevel::Debug, &message);
            return false;
        };

        let from = self.state;
        self.state = rule.to;
        debug!("{} --{}--> {}", from, event, rule.to);

        for action in rule.actions {
            self.apply_action(*action);
        }

        let info = self.state_info();
        self.hooks.on_status_change(self.state, &info);
        true
    }

    fn apply_action(&mut self, action: RuleAction) {
        match action {
            RuleAction::StartSession => {
                self.context.session_started_at = self.context.last_event_timestamp;
            }
            RuleAction::CompleteSession => {
                self.context.session_count = self.context.session_count.saturating_add(1);
                let started = self.context.session_started_at.take();
                if let (Some(started), Some(finished)) =
                    (started, self.context.last_event_timestamp)
                {
                    if let Ok(elapsed) = (finished - started).to_std() {
                        self.context.total_session_time += elapsed;
                    }
                }
            }
            RuleAction::RequestFix => self.hooks.on_fix_requested(&self.context),
            RuleAction::TriggerRerun => self.hooks.on_workflow_rerun(&self.context),
            RuleAction::ClearCiTracking => {
                self.context.running_workflow_run_ids.clear();
                self.context.pending_workflow_run_ids.clear();
                self.context.has_failed_checks = false;
            }
            RuleAction::ResetContext => {
                self.context.session_count = 0;
                self.context.session_started_at = None;
                self.context.total_session_time = Default::default();
                self.context.running_workflow_run_ids.clear();
                self.context.pending_workflow_run_ids.clear();
                self.context.has_failed_checks = false;
            }
            RuleAction::LogMaxSessions => {
                let message = format!(
                    "Maximum sessions reached ({}/{}); automation stopped until reset",
                    self.context.session_count, self.context.max_sessions
                );
                warn!("{}", message);
                self.hooks.on_log(LogLevel::Warn, &message);
            }
            RuleAction::LogNothingToAutomate => {
                let message =
                    "Failed checks detected but neither fix requests nor re-runs are possible";
                info!("{}", message);
                self.hooks.on_log(LogLevel::Info, message);
            }
        }
    }

    pub fn state_info(&self) -> StateInfo {
        self.state.info()
    }

    /// True when waiting for feedback with failed checks a fix can address.
    pub fn should_request_fix(&self) -> bool {
        self.state == CopilotState::WaitingForFeedback
            && self.context.has_failed_checks
            && self.context.can_request_fix()
    }

    /// True when workflows are ready to be re-run and re-runs are enabled.
    pub fn should_trigger_rerun(&self) -> bool {
        self.state == CopilotState::ReadyForRerun && self.context.rerun_enabled()
    }

    pub fn checkpoint(&self) -> MachineCheckpoint {
        MachineCheckpoint {
            state: self.state,
            context: self.context.clone(),
        }
    }

    /// Roll back to `checkpoint`, notifying the hooks if the state changes.
    pub fn restore(&mut self, checkpoint: MachineCheckpoint) {
        let changed = checkpoint.state != self.state;
        self.state = checkpoint.state;
        self.context = checkpoint.context;
        if changed {
            let info = self.state_info();
            self.hooks.on_status_change(self.state, &info);
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }
}
