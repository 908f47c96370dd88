//! The guarded transition table.
//!
//! Transitions are an ordered list of rules. For a `(state, event)` pair the
//! first rule whose guard is absent or satisfied fires; if none does, the
//! event is ignored. Guards are pure predicates over the context and all
//! side effects are described by [`RuleAction`]s, which the machine turns
//! into context mutations and hook calls.

use super::event::CopilotEvent;
use super::state::{CopilotState, StateContext};

/// Pure predicate over the context.
pub type Guard = fn(&StateContext) -> bool;

/// What firing a rule does besides changing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Remember when the agent session opened.
    StartSession,
    /// Count the finished session and accumulate its duration.
    CompleteSession,
    /// Ask the hooks to post a fix request.
    RequestFix,
    /// Ask the hooks to re-run workflows.
    TriggerRerun,
    /// Forget tracked workflow runs and failed-check state.
    ClearCiTracking,
    /// Return the context to its post-reset shape.
    ResetContext,
    LogMaxSessions,
    LogNothingToAutomate,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: CopilotState,
    pub event: CopilotEvent,
    pub guard: Option<Guard>,
    pub to: CopilotState,
    pub actions: &'static [RuleAction],
}

impl TransitionRule {
    pub fn matches(&self, state: CopilotState, event: CopilotEvent, ctx: &StateContext) -> bool {
        self.from == state && self.event == event && self.guard.map_or(true, |guard| guard(ctx))
    }
}

fn reaches_max(ctx: &StateContext) -> bool {
    ctx.next_session_reaches_max()
}

fn can_request_fix(ctx: &StateContext) -> bool {
    ctx.can_request_fix()
}

fn rerun_without_fix(ctx: &StateContext) -> bool {
    !ctx.auto_fix_enabled && ctx.rerun_enabled()
}

fn rerun_enabled(ctx: &StateContext) -> bool {
    ctx.rerun_enabled()
}

fn ci_runs_drained(ctx: &StateContext) -> bool {
    ctx.running_workflow_run_ids.is_empty()
}

const fn rule(
    from: CopilotState,
    event: CopilotEvent,
    guard: Option<Guard>,
    to: CopilotState,
    actions: &'static [RuleAction],
) -> TransitionRule {
    TransitionRule {
        from,
        event,
        guard,
        to,
        actions,
    }
}

const fn reset_from(from: CopilotState) -> TransitionRule {
    rule(
        from,
        CopilotEvent::Reset,
        None,
        CopilotState::Idle,
        &[RuleAction::ResetContext],
    )
}

use CopilotEvent as E;
use CopilotState as S;

const SESSION_LIMIT: &[RuleAction] = &[RuleAction::CompleteSession, RuleAction::LogMaxSessions];
const SESSION_DONE: &[RuleAction] = &[RuleAction::CompleteSession];
const SESSION_START: &[RuleAction] = &[RuleAction::StartSession];

/// The full transition table, in evaluation order.
pub static TRANSITIONS: &[TransitionRule] = &[
    // Idle
    rule(S::Idle, E::WorkStarted, None, S::Working, SESSION_START),
    // Working
    rule(S::Working, E::WorkFinished, Some(reaches_max), S::MaxSessionsReached, SESSION_LIMIT),
    rule(S::Working, E::WorkFinished, None, S::WaitingForFeedback, SESSION_DONE),
    rule(S::Working, E::WorkFailed, Some(reaches_max), S::MaxSessionsReached, SESSION_LIMIT),
    rule(S::Working, E::WorkFailed, None, S::Error, SESSION_DONE),
    // Waiting for feedback: a fix always wins over a re-run
    rule(
        S::WaitingForFeedback,
        E::FailedChecksDetected,
        Some(can_request_fix),
        S::FixRequested,
        &[RuleAction::RequestFix],
    ),
    rule(
        S::WaitingForFeedback,
        E::FailedChecksDetected,
        Some(rerun_without_fix),
        S::ReadyForRerun,
        &[],
    ),
    rule(
        S::WaitingForFeedback,
        E::FailedChecksDetected,
        None,
        S::Idle,
        &[RuleAction::LogNothingToAutomate],
    ),
    rule(
        S::WaitingForFeedback,
        E::NoFailedChecks,
        Some(rerun_enabled),
        S::ReadyForRerun,
        &[],
    ),
    rule(S::WaitingForFeedback, E::NoFailedChecks, None, S::Idle, &[]),
    rule(S::WaitingForFeedback, E::WorkStarted, None, S::Working, SESSION_START),
    // Fix requested
    rule(S::FixRequested, E::WorkStarted, None, S::FixInProgress, SESSION_START),
    // Fix in progress
    rule(S::FixInProgress, E::WorkFinished, Some(reaches_max), S::MaxSessionsReached, SESSION_LIMIT),
    rule(S::FixInProgress, E::WorkFinished, Some(rerun_enabled), S::ReadyForRerun, SESSION_DONE),
    rule(S::FixInProgress, E::WorkFinished, None, S::WaitingForFeedback, SESSION_DONE),
    rule(S::FixInProgress, E::WorkFailed, Some(reaches_max), S::MaxSessionsReached, SESSION_LIMIT),
    rule(S::FixInProgress, E::WorkFailed, None, S::Error, SESSION_DONE),
    // Ready for re-run: only the explicit trigger carries the re-run action
    rule(
        S::ReadyForRerun,
        E::WorkflowRerunTriggered,
        None,
        S::CiRunning,
        &[RuleAction::TriggerRerun],
    ),
    rule(S::ReadyForRerun, E::CiStarted, None, S::CiRunning, &[]),
    rule(S::ReadyForRerun, E::WorkStarted, None, S::Working, SESSION_START),
    // CI running
    rule(
        S::CiRunning,
        E::CiCompleted,
        Some(ci_runs_drained),
        S::Idle,
        &[RuleAction::ClearCiTracking],
    ),
    rule(S::CiRunning, E::WorkStarted, None, S::Working, SESSION_START),
    // Error
    rule(S::Error, E::WorkStarted, None, S::Working, SESSION_START),
    // Reset
    reset_from(S::Idle),
    reset_from(S::Working),
    reset_from(S::WaitingForFeedback),
    reset_from(S::FixRequested),
    reset_from(S::FixInProgress),
    reset_from(S::ReadyForRerun),
    reset_from(S::CiRunning),
    reset_from(S::Error),
    reset_from(S::MaxSessionsReached),
];

/// Find the rule that fires for `event` in `state`, if any.
pub fn find_transition(
    state: CopilotState,
    event: CopilotEvent,
    ctx: &StateContext,
) -> Option<&'static TransitionRule> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.matches(state, event, ctx))
}
