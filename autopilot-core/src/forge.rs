//! Collaborator interfaces the core calls out to.
//!
//! The core never talks to a forge directly. Everything it needs (PR data,
//! CI results, comments, re-runs, pause state, status output) goes through
//! these traits so the manager can be driven by fakes in tests and by a
//! real HTTP client in the server.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::factory::PrKey;
use crate::state_machine::{CopilotState, LogLevel, StateInfo};

/// The parts of a pull request the manager needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSummary {
    pub head_sha: String,
    pub is_open: bool,
}

/// A commit in a specific repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub owner: String,
    pub repo: String,
    pub sha: String,
}

impl CommitRef {
    pub fn for_pr(key: &PrKey, sha: impl Into<String>) -> Self {
        Self {
            owner: key.owner.clone(),
            repo: key.repo.clone(),
            sha: sha.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("workflow run {}", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A legacy commit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Remote API for pull requests and CI.
///
/// Pagination is the implementation's concern: list methods return every
/// item.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn fetch_pull_request(&self, pr: &PrKey) -> Result<PullRequestSummary>;

    async fn list_workflow_runs(&self, commit: &CommitRef) -> Result<Vec<WorkflowRun>>;

    async fn list_check_runs(&self, commit: &CommitRef) -> Result<Vec<CheckRun>>;

    async fn list_commit_statuses(&self, commit: &CommitRef) -> Result<Vec<CommitStatus>>;

    async fn list_jobs(&self, owner: &str, repo: &str, run_id: u64) -> Result<Vec<WorkflowJob>>;

    async fn post_comment(&self, pr: &PrKey, body: &str) -> Result<()>;

    async fn rerun_failed_jobs(&self, owner: &str, repo: &str, run_id: u64) -> Result<()>;

    async fn rerun_entire_workflow(&self, owner: &str, repo: &str, run_id: u64) -> Result<()>;

    /// Approve a run that is waiting for maintainer approval.
    async fn approve_workflow_run(&self, owner: &str, repo: &str, run_id: u64) -> Result<()>;

    /// Returns true if `author` posted a comment containing `marker` on the
    /// PR after `since`.
    async fn has_matching_comment_since(
        &self,
        pr: &PrKey,
        since: DateTime<Utc>,
        author: &str,
        marker: &str,
    ) -> Result<bool>;
}

/// Produces a short, already formatted diagnostic block for failed runs.
///
/// The manager appends the result to fix requests without inspecting it.
#[async_trait]
pub trait LogSummarizer: Send + Sync {
    async fn summarize_failure_logs(
        &self,
        owner: &str,
        repo: &str,
        run_ids: &BTreeSet<u64>,
    ) -> Result<String>;
}

/// Read-only source of truth for suspended automation.
#[async_trait]
pub trait PauseOracle: Send + Sync {
    async fn is_globally_paused(&self) -> Result<bool>;

    async fn is_entity_paused(&self, key: &PrKey) -> Result<bool>;
}

/// Pause oracle that never pauses anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPaused;

#[async_trait]
impl PauseOracle for NeverPaused {
    async fn is_globally_paused(&self) -> Result<bool> {
        Ok(false)
    }

    async fn is_entity_paused(&self, _key: &PrKey) -> Result<bool> {
        Ok(false)
    }
}

/// Receives status and log output for display layers.
pub trait StatusSink: Send + Sync {
    fn on_log(&self, key: &PrKey, level: LogLevel, message: &str);

    fn on_status_change(&self, key: &PrKey, state: CopilotState, info: &StateInfo);
}

/// Sink that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn on_log(&self, key: &PrKey, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("[{}] {}", key, message),
            LogLevel::Info => info!("[{}] {}", key, message),
            LogLevel::Warn => warn!("[{}] {}", key, message),
            LogLevel::Error => error!("[{}] {}", key, message),
        }
    }

    fn on_status_change(&self, key: &PrKey, state: CopilotState, info: &StateInfo) {
        info!("[{}] {} {} ({})", key, info.marker, info.message, state);
    }
}
