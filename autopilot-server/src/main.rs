use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use autopilot_server::config::{parse_log_level, Config};
use autopilot_server::routes::router;
use autopilot_server::{refresh_loop, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = parse_log_level(std::env::var("LOG_LEVEL").ok())?;
    tracing_subscriber::fmt().with_max_level(log_level).init();

    let config = Config::from_env().expect("Failed to load configuration from environment variables");
    let port = config.port;

    info!(
        "Monitoring {} pull request(s), polling every {:?}",
        config.prs.len(),
        config.poll_interval
    );
    if config.username.is_none() {
        info!("AUTOPILOT_USERNAME is not set; fix requests are disabled");
    }

    let app_state = Arc::new(AppState::new(config)?);

    let poller_state = app_state.clone();
    tokio::spawn(async move {
        refresh_loop(poller_state).await;
    });

    let app = router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server listening on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
