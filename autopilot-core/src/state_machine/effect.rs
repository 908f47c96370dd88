//! Effects (side effects as data).
//!
//! The machine never performs I/O. When a transition wants something done
//! it calls the injected [`TransitionHooks`]; the manager's hooks record
//! those calls as [`Effect`] values and execute them after the transition
//! returns.

use serde::Serialize;

use super::state::{CopilotState, StateContext, StateInfo};

/// Log level for logging effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything a transition can ask the outside world to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Effect {
    /// Post a fix request for the failing checks.
    RequestFix,
    /// Re-run (or approve) the workflows that need attention.
    TriggerRerun,
    /// The machine entered a new state.
    StatusChanged { state: CopilotState, info: StateInfo },
    /// Log a message.
    Log { level: LogLevel, message: String },
}

/// Callbacks the machine invokes while firing a transition.
///
/// All methods default to no-ops so tests can override only what they
/// observe.
pub trait TransitionHooks {
    fn on_fix_requested(&mut self, _ctx: &StateContext) {}

    fn on_workflow_rerun(&mut self, _ctx: &StateContext) {}

    fn on_status_change(&mut self, _state: CopilotState, _info: &StateInfo) {}

    fn on_log(&mut self, _level: LogLevel, _message: &str) {}
}

/// Hooks that ignore every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TransitionHooks for NoopHooks {}

/// Hooks that queue every callback as an [`Effect`].
#[derive(Debug, Clone, Default)]
pub struct EffectQueue {
    effects: Vec<Effect>,
}

impl EffectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all queued effects in the order they were produced.
    pub fn drain(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }
}

impl TransitionHooks for EffectQueue {
    fn on_fix_requested(&mut self, _ctx: &StateContext) {
        self.effects.push(Effect::RequestFix);
    }

    fn on_workflow_rerun(&mut self, _ctx: &StateContext) {
        self.effects.push(Effect::TriggerRerun);
    }

    fn on_status_change(&mut self, state: CopilotState, info: &StateInfo) {
        self.effects.push(Effect::StatusChanged { state, info: *info });
    }

    fn on_log(&mut self, level: LogLevel, message: &str) {
        self.effects.push(Effect::Log {
            level,
            message: message.to_string(),
        });
    }
}
