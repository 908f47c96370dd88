//! Fix requests and nudges posted as PR comments.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use super::EntityManager;
use crate::checks::WorkflowCheckResult;
use crate::state_machine::LogLevel;

/// Hidden marker identifying fix requests when checking for duplicates.
pub const FIX_REQUEST_MARKER: &str = "<!-- autopilot:fix-request -->";
pub const NUDGE_MARKER: &str = "<!-- autopilot:nudge -->";

/// Coarse kind of failure, used to pick the opening of a fix request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Tests,
    Build,
    Lint,
    General,
}

impl FailureCategory {
    /// Classify by keyword. When several categories match, tests win over
    /// build, and build over lint.
    pub fn classify<S: AsRef<str>>(checks: &[S]) -> Self {
        let names: Vec<String> = checks
            .iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        let any = |keywords: &[&str]| {
            names
                .iter()
                .any(|name| keywords.iter().any(|keyword| name.contains(keyword)))
        };

        if any(&["test", "spec"]) {
            Self::Tests
        } else if any(&["build", "compile"]) {
            Self::Build
        } else if any(&["lint", "format", "fmt", "clippy", "eslint", "style"]) {
            Self::Lint
        } else {
            Self::General
        }
    }

    fn opening(&self) -> &'static str {
        match self {
            Self::Tests => "some tests are failing. Please investigate the failures and fix them.",
            Self::Build => "the build is failing. Please fix the compilation errors.",
            Self::Lint => "the lint and formatting checks are failing. Please fix the reported issues.",
            Self::General => "some CI checks are failing. Please take a look and fix them.",
        }
    }
}

/// Render the body of a fix request comment.
pub fn render_fix_request<S: AsRef<str>>(mention: &str, failed_checks: &[S], summary: &str) -> String {
    let category = FailureCategory::classify(failed_checks);
    let mut body = format!("{} {}\n\n**Failed checks:**\n", mention, category.opening());
    for name in failed_checks {
        body.push_str(&format!("- `{}`\n", name.as_ref()));
    }

    let summary = summary.trim();
    if !summary.is_empty() {
        body.push('\n');
        body.push_str(summary);
        body.push('\n');
    }

    body.push('\n');
    body.push_str(FIX_REQUEST_MARKER);
    body
}

pub fn render_nudge(mention: &str) -> String {
    format!(
        "{} your last session ended with an error. Please pick up where you left off and finish the task.\n\n{}",
        mention, NUDGE_MARKER
    )
}

impl EntityManager {
    /// Executes the fix request a transition asked for.
    ///
    /// Failed checks are derived again so the comment reflects current CI.
    pub(super) async fn request_fix(&mut self) -> Result<()> {
        let Some(username) = self.machine.context().username().map(str::to_string) else {
            bail!("No username configured to post fix requests");
        };

        let commit = self.head_commit().await?;
        let since = self.machine.context().last_event_timestamp;
        let result = self.failed_checks(&commit, since).await?;
        if !result.has_failures() {
            bail!("Failed checks cleared before the fix request was posted");
        }

        self.post_fix_request(&username, &result, since).await?;
        Ok(())
    }

    /// Summarise, render and post a fix request unless an identical request
    /// was already posted since `since`. Returns true if a comment was posted.
    pub(super) async fn post_fix_request(
        &self,
        username: &str,
        result: &WorkflowCheckResult,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let summarizer = Arc::clone(&self.collaborators.summarizer);
        let summary = match self
            .bounded(
                "Summarising failure logs",
                summarizer.summarize_failure_logs(
                    &self.key.owner,
                    &self.key.repo,
                    &result.failed_workflow_run_ids,
                ),
            )
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                self.log(LogLevel::Warn, &format!("{:#}", err));
                String::new()
            }
        };

        let body = render_fix_request(
            &self.settings.agent_mention,
            &result.failed_checks,
            &summary,
        );
        self.post_once(username, since, FIX_REQUEST_MARKER, &body)
            .await
    }

    pub(super) async fn nudge(&self) -> Result<bool> {
        let Some(username) = self.machine.context().username().map(str::to_string) else {
            return Ok(false);
        };
        let since = self.machine.context().last_event_timestamp;
        let body = render_nudge(&self.settings.agent_mention);
        self.post_once(&username, since, NUDGE_MARKER, &body).await
    }

    async fn post_once(
        &self,
        username: &str,
        since: Option<DateTime<Utc>>,
        marker: &str,
        body: &str,
    ) -> Result<bool> {
        let forge = Arc::clone(&self.collaborators.forge);
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let already_posted = self
            .bounded(
                "Checking for an earlier comment",
                forge.has_matching_comment_since(&self.key, since, username, marker),
            )
            .await?;
        if already_posted {
            self.log(
                LogLevel::Info,
                "Matching comment already posted; not posting again",
            );
            return Ok(false);
        }

        self.bounded("Posting comment", forge.post_comment(&self.key, body))
            .await?;
        self.log(LogLevel::Info, "Posted comment to the agent");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefers_tests() {
        assert_eq!(
            FailureCategory::classify(&["clippy", "unit tests", "build"]),
            FailureCategory::Tests
        );
        assert_eq!(
            FailureCategory::classify(&["Build (ubuntu)", "eslint"]),
            FailureCategory::Build
        );
        assert_eq!(FailureCategory::classify(&["cargo fmt"]), FailureCategory::Lint);
        assert_eq!(
            FailureCategory::classify(&["deploy preview"]),
            FailureCategory::General
        );
        assert_eq!(
            FailureCategory::classify::<&str>(&[]),
            FailureCategory::General
        );
    }

    #[test]
    fn test_render_fix_request() {
        let body = render_fix_request(
            "@copilot",
            &["unit tests", "lint"],
            "### Failed jobs\n- unit tests",
        );

        assert!(body.starts_with("@copilot some tests are failing."));
        assert!(body.contains("- `unit tests`\n- `lint`\n"));
        assert!(body.contains("### Failed jobs"));
        assert!(body.ends_with(FIX_REQUEST_MARKER));
    }

    #[test]
    fn test_render_fix_request_without_summary() {
        let body = render_fix_request("@bot", &["ci/jenkins"], "   ");
        assert_eq!(
            body,
            format!(
                "@bot some CI checks are failing. Please take a look and fix them.\n\n**Failed checks:**\n- `ci/jenkins`\n\n{}",
                FIX_REQUEST_MARKER
            )
        );
    }

    #[test]
    fn test_render_nudge_carries_marker() {
        let body = render_nudge("@copilot");
        assert!(body.starts_with("@copilot "));
        assert!(body.ends_with(NUDGE_MARKER));
        assert!(!body.contains(FIX_REQUEST_MARKER));
    }
}
