//! Workflow check aggregation.
//!
//! Decides whether a commit's CI is in a failed state and, if so, which
//! named checks failed. Check-level results are only consulted when at
//! least one workflow run is failed, so stale failures from healthy
//! workflows are never surfaced.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::forge::{CheckRun, CommitRef, CommitStatus, ForgeClient, WorkflowJob, WorkflowRun};

const FAILED_RUN_CONCLUSIONS: &[&str] = &["action_required", "failure"];
const ATTENTION_RUN_STATUSES: &[&str] = &["action_required", "waiting", "queued", "pending"];
const PASSING_CHECK_CONCLUSIONS: &[&str] = &["success", "neutral", "skipped"];
const FAILING_STATUS_STATES: &[&str] = &["failure", "error"];
const FAILED_JOB_CONCLUSIONS: &[&str] = &["failure", "timed_out"];

/// Case-insensitive substrings whose matching checks are never failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoreList {
    terms: Vec<String>,
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self::new(["copilot"])
    }
}

impl IgnoreList {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        Self { terms }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.terms.iter().any(|term| name.contains(term.as_str()))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// Outcome of one aggregation. Computed fresh on every analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowCheckResult {
    /// Failed check names in discovery order, without duplicates.
    pub failed_checks: Vec<String>,
    pub failed_workflow_run_ids: BTreeSet<u64>,
}

impl WorkflowCheckResult {
    pub fn has_failures(&self) -> bool {
        !self.failed_checks.is_empty()
    }

    fn push_check(&mut self, name: &str) {
        if !self.failed_checks.iter().any(|existing| existing == name) {
            self.failed_checks.push(name.to_string());
        }
    }
}

/// Returns true if the run failed or is stuck waiting on someone.
pub fn run_needs_attention(run: &WorkflowRun) -> bool {
    let concluded_badly = run
        .conclusion
        .as_deref()
        .is_some_and(|c| FAILED_RUN_CONCLUSIONS.contains(&c));
    concluded_badly || ATTENTION_RUN_STATUSES.contains(&run.status.as_str())
}

/// Returns true if the run needs a maintainer's approval before it can run.
pub fn run_awaits_approval(run: &WorkflowRun) -> bool {
    run.status == "action_required" || run.conclusion.as_deref() == Some("action_required")
}

pub fn run_is_active(run: &WorkflowRun) -> bool {
    run.status != "completed"
}

pub fn job_failed(job: &WorkflowJob) -> bool {
    job.conclusion
        .as_deref()
        .is_some_and(|c| FAILED_JOB_CONCLUSIONS.contains(&c))
}

fn after(timestamp: Option<DateTime<Utc>>, since: Option<DateTime<Utc>>) -> bool {
    match (timestamp, since) {
        (Some(ts), Some(since)) => ts > since,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// A check run counts if it completed after `since` with a non-passing
/// conclusion.
pub fn check_run_failed(check: &CheckRun, since: Option<DateTime<Utc>>) -> bool {
    let failing = check
        .conclusion
        .as_deref()
        .is_some_and(|c| !PASSING_CHECK_CONCLUSIONS.contains(&c));
    failing && after(check.completed_at, since)
}

pub fn commit_status_failed(status: &CommitStatus, since: Option<DateTime<Utc>>) -> bool {
    FAILING_STATUS_STATES.contains(&status.state.as_str()) && after(Some(status.updated_at), since)
}

/// Collect the failed checks for `commit`, ignoring anything that finished
/// at or before `since`.
pub async fn collect_failed_checks(
    forge: &dyn ForgeClient,
    commit: &CommitRef,
    since: Option<DateTime<Utc>>,
    ignore: &IgnoreList,
) -> Result<WorkflowCheckResult> {
    let runs = forge
        .list_workflow_runs(commit)
        .await
        .with_context(|| format!("Failed to list workflow runs for {}", commit.sha))?;

    let mut result = WorkflowCheckResult {
        failed_checks: Vec::new(),
        failed_workflow_run_ids: runs
            .iter()
            .filter(|run| run_needs_attention(run) && !ignore.is_ignored(&run.display_name()))
            .map(|run| run.id)
            .collect(),
    };

    if result.failed_workflow_run_ids.is_empty() {
        debug!(
            "No failed workflow runs for {}/{}@{}",
            commit.owner, commit.repo, commit.sha
        );
        return Ok(result);
    }

    let check_runs = forge
        .list_check_runs(commit)
        .await
        .with_context(|| format!("Failed to list check runs for {}", commit.sha))?;
    let statuses = forge
        .list_commit_statuses(commit)
        .await
        .with_context(|| format!("Failed to list commit statuses for {}", commit.sha))?;

    for check in check_runs
        .iter()
        .filter(|check| check_run_failed(check, since))
    {
        if !ignore.is_ignored(&check.name) {
            result.push_check(&check.name);
        }
    }
    for status in statuses
        .iter()
        .filter(|status| commit_status_failed(status, since))
    {
        if !ignore.is_ignored(&status.context) {
            result.push_check(&status.context);
        }
    }

    debug!(
        "{}/{}@{}: {} failed runs, {} failed checks",
        commit.owner,
        commit.repo,
        commit.sha,
        result.failed_workflow_run_ids.len(),
        result.failed_checks.len()
    );
    Ok(result)
}
