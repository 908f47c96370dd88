//! Status types for the status endpoint.

use serde::Serialize;

use autopilot_core::{CopilotState, StatusSnapshot};

/// Summary statistics for the status endpoint.
#[derive(Debug, Default, Serialize)]
pub struct StatusSummary {
    pub total_prs: usize,
    pub idle: usize,
    pub working: usize,
    pub waiting_for_feedback: usize,
    pub fix_requested: usize,
    pub fix_in_progress: usize,
    pub ready_for_rerun: usize,
    pub ci_running: usize,
    pub error: usize,
    pub max_sessions_reached: usize,
    /// PRs whose last cycle withheld automated actions.
    pub paused: usize,
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub globally_paused: bool,
    pub monitored_prs: Vec<String>,
    pub summary: StatusSummary,
    pub prs: Vec<StatusSnapshot>,
}

impl StatusData {
    pub fn from_snapshots(
        snapshots: Vec<StatusSnapshot>,
        monitored_prs: Vec<String>,
        globally_paused: bool,
        version: String,
    ) -> Self {
        let mut summary = StatusSummary {
            total_prs: snapshots.len(),
            ..Default::default()
        };

        for snapshot in &snapshots {
            match snapshot.state {
                CopilotState::Idle => summary.idle += 1,
                CopilotState::Working => summary.working += 1,
                CopilotState::WaitingForFeedback => summary.waiting_for_feedback += 1,
                CopilotState::FixRequested => summary.fix_requested += 1,
                CopilotState::FixInProgress => summary.fix_in_progress += 1,
                CopilotState::ReadyForRerun => summary.ready_for_rerun += 1,
                CopilotState::CiRunning => summary.ci_running += 1,
                CopilotState::Error => summary.error += 1,
                CopilotState::MaxSessionsReached => summary.max_sessions_reached += 1,
            }
            if snapshot.paused.is_some() {
                summary.paused += 1;
            }
        }

        Self {
            version,
            globally_paused,
            monitored_prs,
            summary,
            prs: snapshots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::PauseScope;

    fn snapshot(key: &str, state: CopilotState, paused: Option<PauseScope>) -> StatusSnapshot {
        StatusSnapshot {
            key: key.to_string(),
            state,
            info: state.info(),
            session_count: 1,
            max_sessions: 50,
            total_session_secs: 0,
            running_workflow_run_ids: Vec::new(),
            last_event_timestamp: None,
            paused,
        }
    }

    #[test]
    fn test_status_data_empty() {
        let data = StatusData::from_snapshots(vec![], vec![], false, "1.0.0".to_string());
        assert_eq!(data.summary.total_prs, 0);
        assert!(data.prs.is_empty());
    }

    #[test]
    fn test_status_data_counts_states() {
        let snapshots = vec![
            snapshot("o/r#1", CopilotState::Idle, None),
            snapshot("o/r#2", CopilotState::Idle, Some(PauseScope::Entity)),
            snapshot("o/r#3", CopilotState::CiRunning, None),
            snapshot("o/r#4", CopilotState::FixRequested, None),
            snapshot("o/r#5", CopilotState::MaxSessionsReached, None),
            snapshot("o/r#6", CopilotState::Error, Some(PauseScope::Global)),
        ];

        let data = StatusData::from_snapshots(
            snapshots,
            vec!["o/r#1".to_string()],
            true,
            "1.0.0".to_string(),
        );

        assert_eq!(data.summary.total_prs, 6);
        assert_eq!(data.summary.idle, 2);
        assert_eq!(data.summary.ci_running, 1);
        assert_eq!(data.summary.fix_requested, 1);
        assert_eq!(data.summary.max_sessions_reached, 1);
        assert_eq!(data.summary.error, 1);
        assert_eq!(data.summary.working, 0);
        assert_eq!(data.summary.paused, 2);
        assert!(data.globally_paused);
        assert_eq!(data.prs.len(), 6);
    }

    #[test]
    fn test_status_data_serializes_states_by_name() {
        let data = StatusData::from_snapshots(
            vec![snapshot("o/r#1", CopilotState::ReadyForRerun, None)],
            vec!["o/r#1".to_string()],
            false,
            "1.0.0".to_string(),
        );
        let json = serde_json::to_value(&data).unwrap();

        assert_eq!(json["summary"]["ready_for_rerun"], 1);
        assert_eq!(json["prs"][0]["state"], "READY_FOR_RERUN");
        assert_eq!(json["monitored_prs"][0], "o/r#1");
    }
}
