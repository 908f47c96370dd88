pub mod config;
pub mod github;
pub mod middleware;
pub mod pause;
pub mod poller;
pub mod routes;
pub mod status;
pub mod summary;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

use autopilot_core::{Collaborators, ForgeClient, ManagerFactory};

pub use config::Config;
pub use github::GitHubClient;
pub use pause::ConfigPauseOracle;
pub use poller::{refresh_loop, SeenEvents};
pub use summary::JobSummarizer;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub struct AppState {
    pub config: Arc<Config>,
    pub github: Arc<GitHubClient>,
    pub factory: Arc<ManagerFactory>,
    pub pause: Arc<ConfigPauseOracle>,
    pub seen_events: Mutex<SeenEvents>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let github = Arc::new(GitHubClient::new(
            config.github_token.clone(),
            config.github_api_url.clone(),
            config.api_timeout,
        )?);
        let pause = Arc::new(ConfigPauseOracle::new(
            config.paused,
            config.paused_prs.iter().cloned(),
        ));

        let forge: Arc<dyn ForgeClient> = github.clone();
        let collaborators = Collaborators::new(
            Arc::clone(&forge),
            Arc::new(JobSummarizer::new(forge)),
        )
        .with_pause(pause.clone());
        let factory = Arc::new(ManagerFactory::new(
            collaborators,
            config.manager_settings(),
        ));

        Ok(Self {
            config: Arc::new(config),
            github,
            factory,
            pause,
            seen_events: Mutex::new(SeenEvents::default()),
        })
    }
}
