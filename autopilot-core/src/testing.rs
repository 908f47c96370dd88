//! In-memory fakes for the collaborator traits.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::factory::PrKey;
use crate::forge::{
    CheckRun, CommitRef, CommitStatus, ForgeClient, LogSummarizer, PauseOracle, PullRequestSummary,
    StatusSink, WorkflowJob, WorkflowRun,
};
use crate::state_machine::{CopilotState, LogLevel, StateInfo};

/// A fixed instant offset by `offset` minutes.
pub fn minutes(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(offset)
}

pub fn run(id: u64, name: &str, status: &str, conclusion: Option<&str>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some(name.to_string()),
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        created_at: Some(minutes(0)),
    }
}

pub fn check(
    id: u64,
    name: &str,
    conclusion: Option<&str>,
    completed_at: Option<DateTime<Utc>>,
) -> CheckRun {
    CheckRun {
        id,
        name: name.to_string(),
        status: if completed_at.is_some() {
            "completed".to_string()
        } else {
            "in_progress".to_string()
        },
        conclusion: conclusion.map(str::to_string),
        completed_at,
    }
}

pub fn commit_status(context: &str, state: &str, updated_at: DateTime<Utc>) -> CommitStatus {
    CommitStatus {
        context: context.to_string(),
        state: state.to_string(),
        updated_at,
    }
}

pub fn job(id: u64, name: &str, status: &str, conclusion: Option<&str>) -> WorkflowJob {
    WorkflowJob {
        id,
        name: name.to_string(),
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        html_url: Some(format!("https://example.test/jobs/{}", id)),
    }
}

/// Mutable world behind [`FakeForge`].
#[derive(Debug)]
pub struct ForgeState {
    pub head_sha: String,
    pub is_open: bool,
    pub workflow_runs: Vec<WorkflowRun>,
    pub check_runs: Vec<CheckRun>,
    pub commit_statuses: Vec<CommitStatus>,
    pub jobs: HashMap<u64, Vec<WorkflowJob>>,
    /// Login the fake attributes posted comments to.
    pub comment_author: String,
    pub comments: Vec<String>,
    pub failed_job_reruns: Vec<u64>,
    pub full_reruns: Vec<u64>,
    pub approvals: Vec<u64>,
    /// Error messages returned by `rerun_failed_jobs`, per run.
    pub rerun_failed_jobs_errors: HashMap<u64, String>,
    pub full_rerun_errors: HashMap<u64, String>,
    pub fail_fetch: bool,
    pub fail_list_runs: bool,
    pub fail_post_comment: bool,
    pub fetch_delay: Option<Duration>,
    pub calls: Vec<&'static str>,
}

impl Default for ForgeState {
    fn default() -> Self {
        Self {
            head_sha: "abc123".to_string(),
            is_open: true,
            workflow_runs: Vec::new(),
            check_runs: Vec::new(),
            commit_statuses: Vec::new(),
            jobs: HashMap::new(),
            comment_author: "octocat".to_string(),
            comments: Vec::new(),
            failed_job_reruns: Vec::new(),
            full_reruns: Vec::new(),
            approvals: Vec::new(),
            rerun_failed_jobs_errors: HashMap::new(),
            full_rerun_errors: HashMap::new(),
            fail_fetch: false,
            fail_list_runs: false,
            fail_post_comment: false,
            fetch_delay: None,
            calls: Vec::new(),
        }
    }
}

/// Forge that serves canned data and records every call.
#[derive(Debug, Default)]
pub struct FakeForge {
    state: Mutex<ForgeState>,
}

impl FakeForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(configure: impl FnOnce(&mut ForgeState)) -> Self {
        let forge = Self::new();
        configure(&mut forge.state());
        forge
    }

    pub fn state(&self) -> MutexGuard<'_, ForgeState> {
        self.state.lock().unwrap()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|call| **call == name).count()
    }

    /// Number of calls that changed something on the remote side.
    pub fn mutation_count(&self) -> usize {
        let state = self.state();
        state.comments.len()
            + state.failed_job_reruns.len()
            + state.full_reruns.len()
            + state.approvals.len()
    }

    fn record(&self, name: &'static str) {
        self.state().calls.push(name);
    }
}

#[async_trait]
impl ForgeClient for FakeForge {
    async fn fetch_pull_request(&self, _pr: &PrKey) -> Result<PullRequestSummary> {
        self.record("fetch_pull_request");
        let delay = self.state().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        if state.fail_fetch {
            return Err(anyhow!("GitHub API error: 502 Bad Gateway"));
        }
        Ok(PullRequestSummary {
            head_sha: state.head_sha.clone(),
            is_open: state.is_open,
        })
    }

    async fn list_workflow_runs(&self, _commit: &CommitRef) -> Result<Vec<WorkflowRun>> {
        self.record("list_workflow_runs");
        let state = self.state();
        if state.fail_list_runs {
            return Err(anyhow!("GitHub API error: 500 Internal Server Error"));
        }
        Ok(state.workflow_runs.clone())
    }

    async fn list_check_runs(&self, _commit: &CommitRef) -> Result<Vec<CheckRun>> {
        self.record("list_check_runs");
        Ok(self.state().check_runs.clone())
    }

    async fn list_commit_statuses(&self, _commit: &CommitRef) -> Result<Vec<CommitStatus>> {
        self.record("list_commit_statuses");
        Ok(self.state().commit_statuses.clone())
    }

    async fn list_jobs(&self, _owner: &str, _repo: &str, run_id: u64) -> Result<Vec<WorkflowJob>> {
        self.record("list_jobs");
        Ok(self.state().jobs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn post_comment(&self, _pr: &PrKey, body: &str) -> Result<()> {
        self.record("post_comment");
        let mut state = self.state();
        if state.fail_post_comment {
            return Err(anyhow!("GitHub API error: 503 Service Unavailable"));
        }
        state.comments.push(body.to_string());
        Ok(())
    }

    async fn rerun_failed_jobs(&self, _owner: &str, _repo: &str, run_id: u64) -> Result<()> {
        self.record("rerun_failed_jobs");
        let mut state = self.state();
        if let Some(message) = state.rerun_failed_jobs_errors.get(&run_id) {
            return Err(anyhow!("{}", message));
        }
        state.failed_job_reruns.push(run_id);
        Ok(())
    }

    async fn rerun_entire_workflow(&self, _owner: &str, _repo: &str, run_id: u64) -> Result<()> {
        self.record("rerun_entire_workflow");
        let mut state = self.state();
        if let Some(message) = state.full_rerun_errors.get(&run_id) {
            return Err(anyhow!("{}", message));
        }
        state.full_reruns.push(run_id);
        Ok(())
    }

    async fn approve_workflow_run(&self, _owner: &str, _repo: &str, run_id: u64) -> Result<()> {
        self.record("approve_workflow_run");
        self.state().approvals.push(run_id);
        Ok(())
    }

    async fn has_matching_comment_since(
        &self,
        _pr: &PrKey,
        _since: DateTime<Utc>,
        author: &str,
        marker: &str,
    ) -> Result<bool> {
        self.record("has_matching_comment_since");
        let state = self.state();
        Ok(state.comment_author == author && state.comments.iter().any(|c| c.contains(marker)))
    }
}

#[derive(Debug, Default)]
pub struct FakeSummarizer {
    pub summary: String,
    pub fail: bool,
    pub requests: Mutex<Vec<BTreeSet<u64>>>,
}

impl FakeSummarizer {
    pub fn returning(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LogSummarizer for FakeSummarizer {
    async fn summarize_failure_logs(
        &self,
        _owner: &str,
        _repo: &str,
        run_ids: &BTreeSet<u64>,
    ) -> Result<String> {
        self.requests.lock().unwrap().push(run_ids.clone());
        if self.fail {
            return Err(anyhow!("log download failed"));
        }
        Ok(self.summary.clone())
    }
}

#[derive(Debug, Default)]
pub struct FakePause {
    pub global: Mutex<bool>,
    pub entities: Mutex<HashSet<String>>,
    pub fail: bool,
}

impl FakePause {
    pub fn set_global(&self, paused: bool) {
        *self.global.lock().unwrap() = paused;
    }

    pub fn pause_entity(&self, key: &PrKey) {
        self.entities.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl PauseOracle for FakePause {
    async fn is_globally_paused(&self) -> Result<bool> {
        if self.fail {
            return Err(anyhow!("pause store unreachable"));
        }
        Ok(*self.global.lock().unwrap())
    }

    async fn is_entity_paused(&self, key: &PrKey) -> Result<bool> {
        Ok(self.entities.lock().unwrap().contains(&key.to_string()))
    }
}

/// Sink that keeps everything it is told.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub logs: Mutex<Vec<(LogLevel, String)>>,
    pub states: Mutex<Vec<CopilotState>>,
}

impl RecordingSink {
    pub fn has_log(&self, level: LogLevel, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    pub fn states(&self) -> Vec<CopilotState> {
        self.states.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn on_log(&self, _key: &PrKey, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_status_change(&self, _key: &PrKey, state: CopilotState, _info: &StateInfo) {
        self.states.lock().unwrap().push(state);
    }
}
