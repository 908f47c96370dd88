//! Re-running and approving workflow runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;

use super::EntityManager;
use crate::checks::{run_awaits_approval, run_is_active, run_needs_attention};
use crate::forge::WorkflowRun;
use crate::state_machine::{ContextUpdate, LogLevel};

/// How a failed re-run request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerunFailure {
    /// The failed-jobs endpoint refused; a full re-run may still work.
    NotRerunnable,
    /// Retrying cannot help (broken workflow file, missing permission).
    Irrecoverable,
    Other,
}

pub fn classify_rerun_error(err: &anyhow::Error) -> RerunFailure {
    let message = format!("{:#}", err).to_lowercase();
    if message.contains("cannot be rerun") || message.contains("cannot be retried") {
        RerunFailure::NotRerunnable
    } else if message.contains("workflow file may be broken")
        || message.contains("resource not accessible")
        || message.contains("must have admin rights")
        || message.contains("403")
    {
        RerunFailure::Irrecoverable
    } else {
        RerunFailure::Other
    }
}

impl EntityManager {
    /// Executes the re-run a transition asked for.
    ///
    /// Runs awaiting approval are approved, runs that are already queued are
    /// tracked as they are, and everything else that failed is re-run. The
    /// ids of every run set in motion join the running set.
    ///
    /// Fails without touching the context when nothing was set in motion and
    /// at least one run failed for a reason a later cycle could get past.
    pub(super) async fn trigger_rerun(&mut self) -> Result<()> {
        let commit = self.head_commit().await?;
        let forge = Arc::clone(&self.collaborators.forge);
        let runs = self
            .bounded("Listing workflow runs", forge.list_workflow_runs(&commit))
            .await?;

        let mut triggered = BTreeSet::new();
        let mut retryable: Option<anyhow::Error> = None;
        for run in runs.iter().filter(|run| !self.is_ignored(run)) {
            if run_awaits_approval(run) {
                match self
                    .bounded(
                        "Approving workflow run",
                        forge.approve_workflow_run(&commit.owner, &commit.repo, run.id),
                    )
                    .await
                {
                    Ok(()) => {
                        self.log(
                            LogLevel::Info,
                            &format!("Approved workflow run {} ({})", run.id, run.display_name()),
                        );
                        triggered.insert(run.id);
                    }
                    Err(err) => {
                        if let Some(err) = self.report_rerun_failure(run, err) {
                            retryable.get_or_insert(err);
                        }
                    }
                }
            } else if run_needs_attention(run) {
                if run_is_active(run) {
                    triggered.insert(run.id);
                    continue;
                }
                match self.rerun(run).await {
                    Ok(()) => {
                        self.log(
                            LogLevel::Info,
                            &format!("Re-ran workflow run {} ({})", run.id, run.display_name()),
                        );
                        triggered.insert(run.id);
                    }
                    Err(err) => {
                        if let Some(err) = self.report_rerun_failure(run, err) {
                            retryable.get_or_insert(err);
                        }
                    }
                }
            }
        }

        if triggered.is_empty() {
            if let Some(err) = retryable {
                return Err(err.context("No workflow run could be re-run"));
            }
            self.log(LogLevel::Info, "No workflow runs needed a re-run");
        }

        let mut running = self.machine.context().running_workflow_run_ids.clone();
        running.extend(triggered);
        self.machine.update_context(ContextUpdate {
            running_workflow_run_ids: Some(running),
            pending_workflow_run_ids: Some(BTreeSet::new()),
            ..Default::default()
        });
        Ok(())
    }

    /// Re-run only the failed jobs, falling back to the whole workflow when
    /// the failed-jobs endpoint refuses.
    async fn rerun(&self, run: &WorkflowRun) -> Result<()> {
        let forge = Arc::clone(&self.collaborators.forge);
        let (owner, repo) = (self.key.owner.as_str(), self.key.repo.as_str());

        match self
            .bounded(
                "Re-running failed jobs",
                forge.rerun_failed_jobs(owner, repo, run.id),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if classify_rerun_error(&err) == RerunFailure::NotRerunnable => {
                self.log(
                    LogLevel::Info,
                    &format!(
                        "Failed jobs of run {} cannot be re-run; re-running the whole workflow",
                        run.id
                    ),
                );
                self.bounded(
                    "Re-running workflow",
                    forge.rerun_entire_workflow(owner, repo, run.id),
                )
                .await
            }
            Err(err) => Err(err),
        }
    }

    /// Log a failed re-run. Hands the error back when retrying could help.
    fn report_rerun_failure(&self, run: &WorkflowRun, err: anyhow::Error) -> Option<anyhow::Error> {
        let message = format!(
            "Could not re-run workflow run {} ({}): {:#}",
            run.id,
            run.display_name(),
            err
        );
        match classify_rerun_error(&err) {
            RerunFailure::Irrecoverable => {
                self.log(LogLevel::Warn, &message);
                None
            }
            RerunFailure::NotRerunnable | RerunFailure::Other => {
                self.log(LogLevel::Error, &message);
                Some(err)
            }
        }
    }

    pub(super) fn is_ignored(&self, run: &WorkflowRun) -> bool {
        self.settings.ignore_list.is_ignored(&run.display_name())
    }
}
