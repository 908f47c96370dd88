//! Failure summaries attached to fix requests.
//!
//! Lists the failed jobs of each run with links to their logs, which gives
//! the agent a starting point without copying raw logs into the comment.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use autopilot_core::checks::job_failed;
use autopilot_core::{ForgeClient, LogSummarizer, WorkflowJob};

/// Upper bound on listed jobs, so a large matrix does not flood the comment.
const MAX_LISTED_JOBS: usize = 20;

pub struct JobSummarizer {
    forge: Arc<dyn ForgeClient>,
}

impl JobSummarizer {
    pub fn new(forge: Arc<dyn ForgeClient>) -> Self {
        Self { forge }
    }
}

#[async_trait]
impl LogSummarizer for JobSummarizer {
    async fn summarize_failure_logs(
        &self,
        owner: &str,
        repo: &str,
        run_ids: &BTreeSet<u64>,
    ) -> Result<String> {
        let mut failed = Vec::new();
        for &run_id in run_ids {
            let jobs = self.forge.list_jobs(owner, repo, run_id).await?;
            failed.extend(
                jobs.into_iter()
                    .filter(job_failed)
                    .map(|job| (run_id, job)),
            );
        }
        Ok(render_job_summary(&failed))
    }
}

/// Render failed jobs as a collapsible Markdown list. Empty input renders
/// as an empty string.
pub fn render_job_summary(jobs: &[(u64, WorkflowJob)]) -> String {
    if jobs.is_empty() {
        return String::new();
    }

    let mut summary = String::from("<details>\n<summary>Failed jobs</summary>\n\n");
    for (run_id, job) in jobs.iter().take(MAX_LISTED_JOBS) {
        let conclusion = job.conclusion.as_deref().unwrap_or("failure");
        match &job.html_url {
            Some(url) => summary.push_str(&format!(
                "- [{}]({}) in run {} ({})\n",
                job.name, url, run_id, conclusion
            )),
            None => summary.push_str(&format!(
                "- {} in run {} ({})\n",
                job.name, run_id, conclusion
            )),
        }
    }
    if jobs.len() > MAX_LISTED_JOBS {
        summary.push_str(&format!(
            "- ... and {} more\n",
            jobs.len() - MAX_LISTED_JOBS
        ));
    }
    summary.push_str("\n</details>");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, conclusion: &str, url: Option<&str>) -> WorkflowJob {
        WorkflowJob {
            id: 1,
            name: name.to_string(),
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            html_url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(render_job_summary(&[]), "");
    }

    #[test]
    fn test_summary_links_jobs() {
        let jobs = vec![
            (
                10,
                job("unit tests", "failure", Some("https://github.com/o/r/actions/runs/10/job/1")),
            ),
            (11, job("lint", "timed_out", None)),
        ];
        let summary = render_job_summary(&jobs);

        assert!(summary.starts_with("<details>"));
        assert!(summary.ends_with("</details>"));
        assert!(summary.contains(
            "- [unit tests](https://github.com/o/r/actions/runs/10/job/1) in run 10 (failure)"
        ));
        assert!(summary.contains("- lint in run 11 (timed_out)"));
    }

    #[test]
    fn test_summary_is_truncated() {
        let jobs: Vec<(u64, WorkflowJob)> = (0..25)
            .map(|i| (1, job(&format!("shard {}", i), "failure", None)))
            .collect();
        let summary = render_job_summary(&jobs);

        assert!(summary.contains("shard 19"));
        assert!(!summary.contains("shard 20"));
        assert!(summary.contains("... and 5 more"));
    }
}
