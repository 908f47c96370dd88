use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;
use tracing::Level;

use autopilot_core::state_machine::DEFAULT_MAX_SESSIONS;
use autopilot_core::{IgnoreList, ManagerOptions, ManagerSettings, PrKey};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub github_token: String,
    pub github_api_url: String,
    /// Pull requests to monitor.
    pub prs: Vec<PrKey>,
    /// Account whose token posts comments. Fix requests are disabled without it.
    pub username: Option<String>,
    pub auto_fix_enabled: bool,
    pub auto_approve_enabled: bool,
    pub max_sessions: u32,
    pub nudge_on_error: bool,
    pub poll_interval: Duration,
    pub api_timeout: Duration,
    pub ignored_checks: Vec<String>,
    pub agent_mention: String,
    pub paused: bool,
    pub paused_prs: Vec<PrKey>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token = env::var("GITHUB_TOKEN")
            .context("GITHUB_TOKEN environment variable is required")?;

        let github_api_url = parse_optional(env::var("GITHUB_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let prs = parse_pr_list(
            &env::var("AUTOPILOT_PRS").context("AUTOPILOT_PRS environment variable is required")?,
        )
        .context("AUTOPILOT_PRS must be a comma-separated list of owner/repo#number")?;
        if prs.is_empty() {
            bail!("AUTOPILOT_PRS must name at least one pull request");
        }

        let username = parse_optional(env::var("AUTOPILOT_USERNAME").ok());

        let auto_fix_enabled =
            parse_bool("AUTO_FIX_ENABLED", env::var("AUTO_FIX_ENABLED").ok(), true)?;
        let auto_approve_enabled = parse_bool(
            "AUTO_APPROVE_ENABLED",
            env::var("AUTO_APPROVE_ENABLED").ok(),
            false,
        )?;
        let nudge_on_error = parse_bool("NUDGE_ON_ERROR", env::var("NUDGE_ON_ERROR").ok(), false)?;
        let paused = parse_bool("AUTOPILOT_PAUSED", env::var("AUTOPILOT_PAUSED").ok(), false)?;

        let max_sessions = env::var("MAX_SESSIONS")
            .unwrap_or_else(|_| DEFAULT_MAX_SESSIONS.to_string())
            .parse::<u32>()
            .context("MAX_SESSIONS must be a valid number")?;
        if max_sessions == 0 {
            bail!("MAX_SESSIONS must be at least 1");
        }

        let poll_interval = parse_seconds(
            "POLL_INTERVAL_SECS",
            env::var("POLL_INTERVAL_SECS").ok(),
            60,
        )?;
        let api_timeout = parse_seconds("API_TIMEOUT_SECS", env::var("API_TIMEOUT_SECS").ok(), 30)?;

        let ignored_checks = parse_list(env::var("IGNORED_CHECKS").ok(), &["copilot"]);

        let agent_mention = parse_optional(env::var("AGENT_MENTION").ok())
            .unwrap_or_else(|| autopilot_core::manager::DEFAULT_AGENT_MENTION.to_string());

        let paused_prs = match parse_optional(env::var("AUTOPILOT_PAUSED_PRS").ok()) {
            Some(value) => parse_pr_list(&value)
                .context("AUTOPILOT_PAUSED_PRS must be a comma-separated list of owner/repo#number")?,
            None => Vec::new(),
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        Ok(Config {
            github_token,
            github_api_url,
            prs,
            username,
            auto_fix_enabled,
            auto_approve_enabled,
            max_sessions,
            nudge_on_error,
            poll_interval,
            api_timeout,
            ignored_checks,
            agent_mention,
            paused,
            paused_prs,
            port,
        })
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            auto_fix_enabled: self.auto_fix_enabled,
            auto_approve_enabled: self.auto_approve_enabled,
            username: self.username.clone(),
            max_sessions: self.max_sessions,
            nudge_on_error: self.nudge_on_error,
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            api_timeout: self.api_timeout,
            ignore_list: IgnoreList::new(&self.ignored_checks),
            agent_mention: self.agent_mention.clone(),
        }
    }
}

/// Returns None if the value is missing, empty, or only whitespace.
pub fn parse_optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a boolean flag, falling back to `default` when unset.
pub fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = parse_optional(value) else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("{} must be true or false, got {:?}", name, other),
    }
}

pub fn parse_seconds(name: &str, value: Option<String>, default: u64) -> Result<Duration> {
    let seconds = match parse_optional(value) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("{} must be a number of seconds", name))?,
        None => default,
    };
    if seconds == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(Duration::from_secs(seconds))
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(value: Option<String>, default: &[&str]) -> Vec<String> {
    match parse_optional(value) {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        None => default.iter().map(|item| item.to_string()).collect(),
    }
}

/// Parse `owner/repo#number` keys separated by commas, keeping the first
/// occurrence of duplicates.
pub fn parse_pr_list(value: &str) -> Result<Vec<PrKey>> {
    let mut keys: Vec<PrKey> = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let key: PrKey = item.parse()?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

pub fn parse_log_level(value: Option<String>) -> Result<Level> {
    match parse_optional(value) {
        Some(value) => value
            .parse::<Level>()
            .map_err(|_| anyhow::anyhow!("LOG_LEVEL must be one of trace, debug, info, warn, error")),
        None => Ok(Level::INFO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optional_blank_is_none() {
        assert_eq!(parse_optional(None), None);
        assert_eq!(parse_optional(Some("".to_string())), None);
        assert_eq!(parse_optional(Some(" \t".to_string())), None);
        assert_eq!(
            parse_optional(Some(" octocat ".to_string())),
            Some("octocat".to_string())
        );
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", None, true).unwrap());
        assert!(!parse_bool("X", Some("".to_string()), false).unwrap());
        assert!(parse_bool("X", Some("TRUE".to_string()), false).unwrap());
        assert!(parse_bool("X", Some("1".to_string()), false).unwrap());
        assert!(!parse_bool("X", Some("off".to_string()), true).unwrap());

        let err = parse_bool("AUTO_FIX_ENABLED", Some("maybe".to_string()), true).unwrap_err();
        assert!(err.to_string().contains("AUTO_FIX_ENABLED"));
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(
            parse_seconds("X", None, 60).unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(
            parse_seconds("X", Some("15".to_string()), 60).unwrap(),
            Duration::from_secs(15)
        );
        assert!(parse_seconds("X", Some("0".to_string()), 60).is_err());
        assert!(parse_seconds("X", Some("soon".to_string()), 60).is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(None, &["copilot"]), vec!["copilot"]);
        assert_eq!(
            parse_list(Some("copilot, docs ,,".to_string()), &[]),
            vec!["copilot", "docs"]
        );
    }

    #[test]
    fn test_parse_pr_list() {
        let keys = parse_pr_list("octo/a#1, octo/b#2,octo/a#1,").unwrap();
        assert_eq!(
            keys,
            vec![PrKey::new("octo", "a", 1), PrKey::new("octo", "b", 2)]
        );
        assert!(parse_pr_list("octo/a").is_err());
        assert!(parse_pr_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level(None).unwrap(), Level::INFO);
        assert_eq!(
            parse_log_level(Some("debug".to_string())).unwrap(),
            Level::DEBUG
        );
        assert!(parse_log_level(Some("loud".to_string())).is_err());
    }

    #[test]
    fn test_manager_settings_use_configured_ignore_list() {
        let config = Config {
            github_token: "token".to_string(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            prs: vec![PrKey::new("octo", "a", 1)],
            username: Some("octocat".to_string()),
            auto_fix_enabled: true,
            auto_approve_enabled: true,
            max_sessions: 5,
            nudge_on_error: false,
            poll_interval: Duration::from_secs(60),
            api_timeout: Duration::from_secs(10),
            ignored_checks: vec!["Docs".to_string()],
            agent_mention: "@bot".to_string(),
            paused: false,
            paused_prs: Vec::new(),
            port: 3000,
        };

        let settings = config.manager_settings();
        assert!(settings.ignore_list.is_ignored("build-docs"));
        assert!(!settings.ignore_list.is_ignored("copilot"));
        assert_eq!(settings.api_timeout, Duration::from_secs(10));

        let options = config.manager_options();
        assert_eq!(options.max_sessions, 5);
        assert_eq!(options.username.as_deref(), Some("octocat"));
    }
}
