use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use autopilot_core::{
    CheckRun, CommitRef, CommitStatus, ForgeClient, ObservedEventKind, PrKey, PullRequestSummary,
    WorkflowJob, WorkflowRun,
};

use crate::middleware::CorrelationMiddleware;

const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
pub struct CreateCommentRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    pub user: CommentUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CommentUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    state: String,
    head: PullRequestHead,
}

#[derive(Debug, Deserialize)]
struct PullRequestHead {
    sha: String,
}

/// One entry of an issue timeline. Most event types are irrelevant here, so
/// only the fields shared by the agent events are read.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// The most recent agent lifecycle event on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentEvent {
    pub kind: ObservedEventKind,
    pub created_at: DateTime<Utc>,
}

trait Page<T>: DeserializeOwned {
    fn into_items(self) -> Vec<T>;
}

impl<T: DeserializeOwned> Page<T> for Vec<T> {
    fn into_items(self) -> Vec<T> {
        self
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

impl Page<WorkflowRun> for WorkflowRunsPage {
    fn into_items(self) -> Vec<WorkflowRun> {
        self.workflow_runs
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunsPage {
    check_runs: Vec<CheckRun>,
}

impl Page<CheckRun> for CheckRunsPage {
    fn into_items(self) -> Vec<CheckRun> {
        self.check_runs
    }
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    jobs: Vec<WorkflowJob>,
}

impl Page<WorkflowJob> for JobsPage {
    fn into_items(self) -> Vec<WorkflowJob> {
        self.jobs
    }
}

impl GitHubClient {
    pub fn new(token: String, api_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_github_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, owner, repo, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("GitHub API error: {} - {}", status, error_text);
            return Err(anyhow!("GitHub API error: {} - {}", status, error_text));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", what))
    }

    async fn post(&self, url: &str, what: &str, body: Option<String>) -> Result<()> {
        let mut request_builder = self.authorized(self.client.post(url));
        if let Some(body) = body {
            request_builder = request_builder
                .body(body)
                .header("Content-Type", "application/json");
        }

        let response = request_builder
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("GitHub API error: {} - {}", status, error_text);
            return Err(anyhow!("GitHub API error: {} - {}", status, error_text));
        }
        Ok(())
    }

    /// Fetch every page of a list endpoint.
    async fn get_all<T, P>(&self, url: &str, what: &str) -> Result<Vec<T>>
    where
        P: Page<T>,
    {
        let separator = if url.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let page_url = format!("{}{}page={}&per_page={}", url, separator, page, PER_PAGE);
            let items = self.get_json::<P>(&page_url, what).await?.into_items();
            let count = items.len();
            all.extend(items);

            // A short page is the last one
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} item(s) from {}", all.len(), what);
        Ok(all)
    }

    pub async fn list_comments_since(
        &self,
        pr: &PrKey,
        since: DateTime<Utc>,
    ) -> Result<Vec<Comment>> {
        // Callers without a baseline pass the minimum timestamp, which the
        // API cannot parse.
        let path = if since.timestamp() > 0 {
            format!(
                "issues/{}/comments?since={}",
                pr.number,
                since.format("%Y-%m-%dT%H:%M:%SZ")
            )
        } else {
            format!("issues/{}/comments", pr.number)
        };
        let url = self.repo_url(&pr.owner, &pr.repo, &path);
        self.get_all::<Comment, Vec<Comment>>(&url, "list comments").await
    }

    /// The latest agent work event on the PR timeline, if any.
    pub async fn latest_agent_event(&self, pr: &PrKey) -> Result<Option<AgentEvent>> {
        let url = self.repo_url(&pr.owner, &pr.repo, &format!("issues/{}/timeline", pr.number));
        let events = self
            .get_all::<TimelineEvent, Vec<TimelineEvent>>(&url, "issue timeline")
            .await?;
        Ok(latest_agent_event(&events))
    }
}

#[async_trait]
impl ForgeClient for GitHubClient {
    async fn fetch_pull_request(&self, pr: &PrKey) -> Result<PullRequestSummary> {
        let url = self.repo_url(&pr.owner, &pr.repo, &format!("pulls/{}", pr.number));
        let response: PullRequestResponse = self.get_json(&url, "get pull request").await?;
        Ok(PullRequestSummary {
            head_sha: response.head.sha,
            is_open: response.state == "open",
        })
    }

    async fn list_workflow_runs(&self, commit: &CommitRef) -> Result<Vec<WorkflowRun>> {
        let url = self.repo_url(
            &commit.owner,
            &commit.repo,
            &format!("actions/runs?head_sha={}", commit.sha),
        );
        self.get_all::<WorkflowRun, WorkflowRunsPage>(&url, "list workflow runs")
            .await
    }

    async fn list_check_runs(&self, commit: &CommitRef) -> Result<Vec<CheckRun>> {
        let url = self.repo_url(
            &commit.owner,
            &commit.repo,
            &format!("commits/{}/check-runs", commit.sha),
        );
        self.get_all::<CheckRun, CheckRunsPage>(&url, "list check runs")
            .await
    }

    async fn list_commit_statuses(&self, commit: &CommitRef) -> Result<Vec<CommitStatus>> {
        let url = self.repo_url(
            &commit.owner,
            &commit.repo,
            &format!("commits/{}/statuses", commit.sha),
        );
        self.get_all::<CommitStatus, Vec<CommitStatus>>(&url, "list commit statuses")
            .await
    }

    async fn list_jobs(&self, owner: &str, repo: &str, run_id: u64) -> Result<Vec<WorkflowJob>> {
        let url = self.repo_url(owner, repo, &format!("actions/runs/{}/jobs", run_id));
        self.get_all::<WorkflowJob, JobsPage>(&url, "list jobs").await
    }

    async fn post_comment(&self, pr: &PrKey, body: &str) -> Result<()> {
        let url = self.repo_url(&pr.owner, &pr.repo, &format!("issues/{}/comments", pr.number));
        let request = CreateCommentRequest {
            body: body.to_string(),
        };
        self.post(
            &url,
            "post comment",
            Some(serde_json::to_string(&request).context("Failed to encode comment")?),
        )
        .await
    }

    async fn rerun_failed_jobs(&self, owner: &str, repo: &str, run_id: u64) -> Result<()> {
        let url = self.repo_url(owner, repo, &format!("actions/runs/{}/rerun-failed-jobs", run_id));
        self.post(&url, "re-run failed jobs", None).await
    }

    async fn rerun_entire_workflow(&self, owner: &str, repo: &str, run_id: u64) -> Result<()> {
        let url = self.repo_url(owner, repo, &format!("actions/runs/{}/rerun", run_id));
        self.post(&url, "re-run workflow", None).await
    }

    async fn approve_workflow_run(&self, owner: &str, repo: &str, run_id: u64) -> Result<()> {
        let url = self.repo_url(owner, repo, &format!("actions/runs/{}/approve", run_id));
        self.post(&url, "approve workflow run", None).await
    }

    async fn has_matching_comment_since(
        &self,
        pr: &PrKey,
        since: DateTime<Utc>,
        author: &str,
        marker: &str,
    ) -> Result<bool> {
        let comments = self.list_comments_since(pr, since).await?;
        Ok(comments
            .iter()
            .any(|comment| comment_matches(comment, since, author, marker)))
    }
}

/// The API's `since` filter compares update times, so creation time and
/// author are checked again here.
pub fn comment_matches(comment: &Comment, since: DateTime<Utc>, author: &str, marker: &str) -> bool {
    comment.user.login.eq_ignore_ascii_case(author)
        && comment.created_at > since
        && comment.body.contains(marker)
}

/// Map a timeline event name to the agent event it reports.
pub fn agent_event_kind(event: &str) -> Option<ObservedEventKind> {
    match event {
        "copilot_work_started" => Some(ObservedEventKind::WorkStarted),
        "copilot_work_finished" => Some(ObservedEventKind::WorkFinished),
        "copilot_work_finished_failure" => Some(ObservedEventKind::WorkFailed),
        _ => None,
    }
}

/// The agent event with the latest timestamp. Ties go to the later entry.
pub fn latest_agent_event(events: &[TimelineEvent]) -> Option<AgentEvent> {
    events
        .iter()
        .filter_map(|event| {
            let kind = agent_event_kind(event.event.as_deref()?)?;
            Some(AgentEvent {
                kind,
                created_at: event.created_at?,
            })
        })
        .fold(None, |latest: Option<AgentEvent>, event| match latest {
            Some(current) if current.created_at > event.created_at => Some(current),
            _ => Some(event),
        })
}

/// Create an HTTP client that tags and logs every GitHub request.
pub fn create_github_client(timeout: Duration) -> Result<ClientWithMiddleware> {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!("autopilot/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ClientBuilder::new(client)
        .with(CorrelationMiddleware)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn timeline(event: &str, minute: u32) -> TimelineEvent {
        TimelineEvent {
            event: Some(event.to_string()),
            created_at: Some(at(minute)),
        }
    }

    fn comment(login: &str, body: &str, minute: u32) -> Comment {
        Comment {
            id: 1,
            body: body.to_string(),
            user: CommentUser {
                login: login.to_string(),
            },
            created_at: at(minute),
        }
    }

    #[test]
    fn test_agent_event_kind() {
        assert_eq!(
            agent_event_kind("copilot_work_started"),
            Some(ObservedEventKind::WorkStarted)
        );
        assert_eq!(
            agent_event_kind("copilot_work_finished"),
            Some(ObservedEventKind::WorkFinished)
        );
        assert_eq!(
            agent_event_kind("copilot_work_finished_failure"),
            Some(ObservedEventKind::WorkFailed)
        );
        assert_eq!(agent_event_kind("commented"), None);
    }

    #[test]
    fn test_latest_agent_event_picks_most_recent() {
        let events = vec![
            timeline("copilot_work_started", 1),
            timeline("commented", 9),
            timeline("copilot_work_finished", 5),
            timeline("copilot_work_started", 3),
        ];
        assert_eq!(
            latest_agent_event(&events),
            Some(AgentEvent {
                kind: ObservedEventKind::WorkFinished,
                created_at: at(5),
            })
        );
    }

    #[test]
    fn test_latest_agent_event_skips_undated_and_unrelated() {
        let events = vec![
            TimelineEvent {
                event: Some("copilot_work_started".to_string()),
                created_at: None,
            },
            TimelineEvent {
                event: None,
                created_at: Some(at(2)),
            },
            timeline("labeled", 3),
        ];
        assert_eq!(latest_agent_event(&events), None);
    }

    #[test]
    fn test_timeline_event_deserializes_partial_entries() {
        let events: Vec<TimelineEvent> = serde_json::from_str(
            r#"[
                {"event": "committed", "sha": "abc"},
                {"event": "copilot_work_finished_failure", "created_at": "2024-05-01T12:07:00Z"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            latest_agent_event(&events),
            Some(AgentEvent {
                kind: ObservedEventKind::WorkFailed,
                created_at: at(7),
            })
        );
    }

    #[test]
    fn test_comment_matches() {
        let marker = "<!-- marker -->";
        let since = at(10);

        assert!(comment_matches(
            &comment("octocat", "please fix\n<!-- marker -->", 11),
            since,
            "octocat",
            marker
        ));
        assert!(comment_matches(
            &comment("OctoCat", marker, 11),
            since,
            "octocat",
            marker
        ));
        // Too old
        assert!(!comment_matches(&comment("octocat", marker, 10), since, "octocat", marker));
        // Someone else
        assert!(!comment_matches(&comment("hubot", marker, 11), since, "octocat", marker));
        // No marker
        assert!(!comment_matches(&comment("octocat", "hello", 11), since, "octocat", marker));
    }

    #[test]
    fn test_workflow_runs_page_deserializes() {
        let page: WorkflowRunsPage = serde_json::from_str(
            r#"{
                "total_count": 1,
                "workflow_runs": [
                    {"id": 42, "name": "CI", "status": "completed", "conclusion": "failure",
                     "created_at": "2024-05-01T12:00:00Z", "head_sha": "abc"}
                ]
            }"#,
        )
        .unwrap();
        let runs = page.into_items();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, 42);
        assert_eq!(runs[0].conclusion.as_deref(), Some("failure"));
    }

    #[test]
    fn test_pull_request_response_deserializes() {
        let response: PullRequestResponse = serde_json::from_str(
            r#"{"number": 7, "state": "closed", "head": {"sha": "def456", "ref": "fix"}}"#,
        )
        .unwrap();
        assert_eq!(response.state, "closed");
        assert_eq!(response.head.sha, "def456");
    }
}
