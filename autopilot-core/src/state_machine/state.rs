//! State types for the automation state machine.
//!
//! A single PR's automation lifecycle is a closed set of states plus a
//! context carrying the counters and toggles that transition guards read.
//! The state itself carries no data; everything variable lives in
//! [`StateContext`], which is only mutated through the machine.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Session limit applied when the caller does not configure one.
pub const DEFAULT_MAX_SESSIONS: u32 = 50;

/// The vertices of the automation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopilotState {
    /// Nothing in flight. Initial state and target of `RESET`.
    Idle,
    /// The agent is working on the PR.
    Working,
    /// The agent finished; CI results decide what happens next.
    WaitingForFeedback,
    /// A fix request was posted; waiting for the agent to pick it up.
    FixRequested,
    /// The agent is working on a requested fix.
    FixInProgress,
    /// Workflows should be re-run (or approved).
    ReadyForRerun,
    /// Re-run workflows are in progress.
    CiRunning,
    /// The last agent session failed.
    Error,
    /// The session budget is spent; only `RESET` leaves this state.
    MaxSessionsReached,
}

impl CopilotState {
    pub const ALL: [CopilotState; 9] = [
        CopilotState::Idle,
        CopilotState::Working,
        CopilotState::WaitingForFeedback,
        CopilotState::FixRequested,
        CopilotState::FixInProgress,
        CopilotState::ReadyForRerun,
        CopilotState::CiRunning,
        CopilotState::Error,
        CopilotState::MaxSessionsReached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Working => "WORKING",
            Self::WaitingForFeedback => "WAITING_FOR_FEEDBACK",
            Self::FixRequested => "FIX_REQUESTED",
            Self::FixInProgress => "FIX_IN_PROGRESS",
            Self::ReadyForRerun => "READY_FOR_RERUN",
            Self::CiRunning => "CI_RUNNING",
            Self::Error => "ERROR",
            Self::MaxSessionsReached => "MAX_SESSIONS_REACHED",
        }
    }

    /// Returns true while an agent session is open.
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Working | Self::FixInProgress)
    }

    /// Display information for this state.
    ///
    /// This is the only view of the machine that status renderers should
    /// depend on.
    pub fn info(&self) -> StateInfo {
        let (label, message, marker, color) = match self {
            Self::Idle => ("Idle", "No automation in progress", "💤", ColorHint::Gray),
            Self::Working => ("Working", "Copilot is working", "🤖", ColorHint::Blue),
            Self::WaitingForFeedback => (
                "Waiting",
                "Waiting for CI feedback",
                "⏳",
                ColorHint::Yellow,
            ),
            Self::FixRequested => (
                "Fix requested",
                "Asked Copilot to fix failing checks",
                "🔧",
                ColorHint::Magenta,
            ),
            Self::FixInProgress => (
                "Fixing",
                "Copilot is fixing failing checks",
                "🛠️",
                ColorHint::Blue,
            ),
            Self::ReadyForRerun => (
                "Ready for re-run",
                "Ready to re-run workflows",
                "🔁",
                ColorHint::Cyan,
            ),
            Self::CiRunning => ("CI running", "Workflows are running", "🏃", ColorHint::Cyan),
            Self::Error => ("Error", "Copilot session failed", "❌", ColorHint::Red),
            Self::MaxSessionsReached => (
                "Session limit",
                "Maximum Copilot sessions reached; reset required",
                "🛑",
                ColorHint::Red,
            ),
        };
        StateInfo {
            label,
            message,
            marker,
            color,
        }
    }
}

impl fmt::Display for CopilotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Colour suggestion for terminal and web renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorHint {
    Gray,
    Blue,
    Yellow,
    Magenta,
    Cyan,
    Red,
}

/// Pure rendering of a state for display layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    pub label: &'static str,
    pub message: &'static str,
    pub marker: &'static str,
    pub color: ColorHint,
}

/// Mutable context attached to one state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateContext {
    pub has_failed_checks: bool,
    pub auto_fix_enabled: bool,
    /// Enables workflow re-runs and approvals.
    pub auto_approve_enabled: bool,
    /// Account that posts fix requests. Fix requests are suppressed without it.
    pub username: Option<String>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    /// Failed run ids found by the last analysis, not yet re-run.
    pub pending_workflow_run_ids: BTreeSet<u64>,
    /// Run ids believed to be running by the last CI poll.
    pub running_workflow_run_ids: BTreeSet<u64>,
    pub session_count: u32,
    pub max_sessions: u32,
    pub total_session_time: Duration,
    /// Timestamp of the event that opened the current session.
    pub session_started_at: Option<DateTime<Utc>>,
}

impl Default for StateContext {
    fn default() -> Self {
        Self {
            has_failed_checks: false,
            auto_fix_enabled: false,
            auto_approve_enabled: false,
            username: None,
            last_event_timestamp: None,
            pending_workflow_run_ids: BTreeSet::new(),
            running_workflow_run_ids: BTreeSet::new(),
            session_count: 0,
            max_sessions: DEFAULT_MAX_SESSIONS,
            total_session_time: Duration::ZERO,
            session_started_at: None,
        }
    }
}

impl StateContext {
    /// The configured username, treating blank strings as absent.
    pub fn username(&self) -> Option<&str> {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn can_request_fix(&self) -> bool {
        self.auto_fix_enabled && self.username().is_some()
    }

    pub fn rerun_enabled(&self) -> bool {
        self.auto_approve_enabled
    }

    /// Returns true if completing the current session spends the budget.
    pub fn next_session_reaches_max(&self) -> bool {
        self.session_count.saturating_add(1) >= self.max_sessions
    }

    /// Merge the `Some` fields of `update` into this context.
    pub fn apply(&mut self, update: ContextUpdate) {
        if let Some(value) = update.has_failed_checks {
            self.has_failed_checks = value;
        }
        if let Some(value) = update.auto_fix_enabled {
            self.auto_fix_enabled = value;
        }
        if let Some(value) = update.auto_approve_enabled {
            self.auto_approve_enabled = value;
        }
        if let Some(value) = update.username {
            self.username = value;
        }
        if let Some(value) = update.last_event_timestamp {
            self.last_event_timestamp = Some(value);
        }
        if let Some(value) = update.pending_workflow_run_ids {
            self.pending_workflow_run_ids = value;
        }
        if let Some(value) = update.running_workflow_run_ids {
            self.running_workflow_run_ids = value;
        }
        if let Some(value) = update.max_sessions {
            self.max_sessions = value;
        }
    }
}

/// Partial update of a [`StateContext`].
///
/// The session counters are deliberately absent: they only move through
/// transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextUpdate {
    pub has_failed_checks: Option<bool>,
    pub auto_fix_enabled: Option<bool>,
    pub auto_approve_enabled: Option<bool>,
    pub username: Option<Option<String>>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    pub pending_workflow_run_ids: Option<BTreeSet<u64>>,
    pub running_workflow_run_ids: Option<BTreeSet<u64>>,
    pub max_sessions: Option<u32>,
}

impl ContextUpdate {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_event_timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn running(run_ids: BTreeSet<u64>) -> Self {
        Self {
            running_workflow_run_ids: Some(run_ids),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context() {
        let ctx = StateContext::default();
        assert_eq!(ctx.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(ctx.session_count, 0);
        assert!(!ctx.can_request_fix());
        assert!(!ctx.rerun_enabled());
    }

    #[test]
    fn test_blank_username_counts_as_missing() {
        let ctx = StateContext {
            auto_fix_enabled: true,
            username: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(ctx.username(), None);
        assert!(!ctx.can_request_fix());
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut ctx = StateContext {
            auto_fix_enabled: true,
            username: Some("octocat".to_string()),
            ..Default::default()
        };

        ctx.apply(ContextUpdate {
            auto_approve_enabled: Some(true),
            max_sessions: Some(3),
            ..Default::default()
        });

        assert!(ctx.auto_fix_enabled);
        assert!(ctx.auto_approve_enabled);
        assert_eq!(ctx.username(), Some("octocat"));
        assert_eq!(ctx.max_sessions, 3);
    }

    #[test]
    fn test_apply_can_clear_username() {
        let mut ctx = StateContext {
            username: Some("octocat".to_string()),
            ..Default::default()
        };
        ctx.apply(ContextUpdate {
            username: Some(None),
            ..Default::default()
        });
        assert_eq!(ctx.username, None);
    }

    #[test]
    fn test_next_session_reaches_max() {
        let mut ctx = StateContext {
            max_sessions: 2,
            ..Default::default()
        };
        assert!(!ctx.next_session_reaches_max());
        ctx.session_count = 1;
        assert!(ctx.next_session_reaches_max());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CopilotState::WaitingForFeedback.to_string(), "WAITING_FOR_FEEDBACK");
        assert_eq!(
            CopilotState::MaxSessionsReached.to_string(),
            "MAX_SESSIONS_REACHED"
        );
    }

    #[test]
    fn test_every_state_has_distinct_label() {
        let mut labels: Vec<&str> = CopilotState::ALL.iter().map(|s| s.info().label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), CopilotState::ALL.len());
    }
}
