//! Events that drive state transitions.
//!
//! [`CopilotEvent`] is the machine's edge alphabet. [`ObservedEventKind`] is
//! the smaller vocabulary of raw signals the surrounding poller reports; the
//! remaining events are produced by the manager itself while analysing CI.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// All events that can trigger state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopilotEvent {
    WorkStarted,
    WorkFinished,
    WorkFailed,
    FailedChecksDetected,
    NoFailedChecks,
    WorkflowRerunTriggered,
    CiStarted,
    CiCompleted,
    Reset,
}

impl CopilotEvent {
    pub const ALL: [CopilotEvent; 9] = [
        CopilotEvent::WorkStarted,
        CopilotEvent::WorkFinished,
        CopilotEvent::WorkFailed,
        CopilotEvent::FailedChecksDetected,
        CopilotEvent::NoFailedChecks,
        CopilotEvent::WorkflowRerunTriggered,
        CopilotEvent::CiStarted,
        CopilotEvent::CiCompleted,
        CopilotEvent::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkStarted => "WORK_STARTED",
            Self::WorkFinished => "WORK_FINISHED",
            Self::WorkFailed => "WORK_FAILED",
            Self::FailedChecksDetected => "FAILED_CHECKS_DETECTED",
            Self::NoFailedChecks => "NO_FAILED_CHECKS",
            Self::WorkflowRerunTriggered => "WORKFLOW_RERUN_TRIGGERED",
            Self::CiStarted => "CI_STARTED",
            Self::CiCompleted => "CI_COMPLETED",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for CopilotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw signal kinds reported by the surrounding poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservedEventKind {
    WorkStarted,
    WorkFinished,
    WorkFailed,
    CiStarted,
    CiCompleted,
}

impl ObservedEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkStarted => "work_started",
            Self::WorkFinished => "work_finished",
            Self::WorkFailed => "work_failed",
            Self::CiStarted => "ci_started",
            Self::CiCompleted => "ci_completed",
        }
    }

    pub fn to_event(self) -> CopilotEvent {
        match self {
            Self::WorkStarted => CopilotEvent::WorkStarted,
            Self::WorkFinished => CopilotEvent::WorkFinished,
            Self::WorkFailed => CopilotEvent::WorkFailed,
            Self::CiStarted => CopilotEvent::CiStarted,
            Self::CiCompleted => CopilotEvent::CiCompleted,
        }
    }
}

/// A raw event kind outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0:?}")]
pub struct UnknownEventKind(pub String);

impl FromStr for ObservedEventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work_started" => Ok(Self::WorkStarted),
            "work_finished" => Ok(Self::WorkFinished),
            "work_failed" => Ok(Self::WorkFailed),
            "ci_started" => Ok(Self::CiStarted),
            "ci_completed" => Ok(Self::CiCompleted),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}
