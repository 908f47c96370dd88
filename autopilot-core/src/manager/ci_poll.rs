//! CI polling while workflows are (about to be) running.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::EntityManager;
use crate::checks::{job_failed, run_is_active, WorkflowCheckResult};
use crate::state_machine::{ContextUpdate, CopilotEvent, CopilotState, LogLevel};

impl EntityManager {
    /// Track which runs are still going and move the machine in or out of
    /// `CI_RUNNING` accordingly.
    pub(super) async fn check_ci_status(&mut self) {
        let checkpoint = self.machine.checkpoint();
        if let Err(err) = self.poll_ci().await {
            self.recover(checkpoint, "CI status check", &err);
        }
    }

    async fn poll_ci(&mut self) -> Result<()> {
        let commit = self.head_commit().await?;
        let forge = Arc::clone(&self.collaborators.forge);
        let runs = self
            .bounded("Listing workflow runs", forge.list_workflow_runs(&commit))
            .await?;

        let active: BTreeSet<u64> = runs
            .iter()
            .filter(|run| run_is_active(run) && !self.is_ignored(run))
            .map(|run| run.id)
            .collect();

        match self.machine.current_state() {
            CopilotState::ReadyForRerun => {
                if !active.is_empty() {
                    self.log(
                        LogLevel::Info,
                        &format!("CI started: {} workflow run(s) active", active.len()),
                    );
                    self.dispatch(CopilotEvent::CiStarted, Some(ContextUpdate::running(active)))
                        .await?;
                }
            }
            CopilotState::CiRunning => {
                let tracked = self.machine.context().running_workflow_run_ids.clone();
                // Runs missing from the listing count as completed.
                let (still_running, completed): (BTreeSet<u64>, BTreeSet<u64>) =
                    tracked.iter().partition(|id| active.contains(*id));

                if !completed.is_empty() {
                    debug!(
                        "[{}] workflow runs completed: {:?}",
                        self.key, completed
                    );
                }

                if still_running.is_empty() {
                    self.log(LogLevel::Info, "All tracked workflow runs completed");
                    self.dispatch(
                        CopilotEvent::CiCompleted,
                        Some(ContextUpdate::running(BTreeSet::new())),
                    )
                    .await?;
                } else if still_running != tracked {
                    self.machine
                        .update_context(ContextUpdate::running(still_running));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Tell the agent about failed jobs without waiting for whole runs to
    /// finish. Never changes state.
    pub(super) async fn check_job_failures(&self) {
        if let Err(err) = self.scan_jobs().await {
            self.log(
                LogLevel::Warn,
                &format!("Job failure check failed: {:#}", err),
            );
        }
    }

    async fn scan_jobs(&self) -> Result<()> {
        let ctx = self.machine.context();
        if !ctx.can_request_fix() {
            return Ok(());
        }
        let Some(username) = ctx.username().map(str::to_string) else {
            return Ok(());
        };
        let since = ctx.last_event_timestamp;
        let tracked = ctx.running_workflow_run_ids.clone();

        let forge = Arc::clone(&self.collaborators.forge);
        let mut result = WorkflowCheckResult::default();
        for run_id in tracked {
            let jobs = self
                .bounded(
                    "Listing jobs",
                    forge.list_jobs(&self.key.owner, &self.key.repo, run_id),
                )
                .await?;

            for job in jobs.iter().filter(|job| job_failed(job)) {
                if self.settings.ignore_list.is_ignored(&job.name) {
                    continue;
                }
                if !result.failed_checks.contains(&job.name) {
                    result.failed_checks.push(job.name.clone());
                }
                result.failed_workflow_run_ids.insert(run_id);
            }
        }

        if !result.has_failures() {
            return Ok(());
        }

        self.log(
            LogLevel::Info,
            &format!(
                "Jobs failed while CI is still running: {}",
                result.failed_checks.join(", ")
            ),
        );
        self.post_fix_request(&username, &result, since).await?;
        Ok(())
    }
}
