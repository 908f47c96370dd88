//! HTTP surface: health, status, and operator controls.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use autopilot_core::{PrKey, StatusSnapshot};

use crate::status::StatusData;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/pause", post(pause_all))
        .route("/resume", post(resume_all))
        .route("/prs/{owner}/{repo}/{number}/reset", post(reset_pr))
        .route("/prs/{owner}/{repo}/{number}/pause", post(pause_pr))
        .route("/prs/{owner}/{repo}/{number}/resume", post(resume_pr))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "autopilot"
    })))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusData> {
    let snapshots = state.factory.snapshots().await;
    let monitored = state.config.prs.iter().map(PrKey::to_string).collect();
    Json(StatusData::from_snapshots(
        snapshots,
        monitored,
        state.pause.is_global(),
        crate::get_version(),
    ))
}

async fn pause_all(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.pause.set_global(true);
    Json(json!({ "paused": true }))
}

async fn resume_all(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.pause.set_global(false);
    Json(json!({ "paused": false }))
}

/// Leave `MAX_SESSIONS_REACHED` (or any other state) for `IDLE`.
async fn reset_pr(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    let key = PrKey::new(owner, repo, number);
    match state.factory.reset(&key).await {
        Some(snapshot) => {
            info!("Reset {} on operator request", key);
            Ok(Json(snapshot))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn pause_pr(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Json<serde_json::Value> {
    let key = PrKey::new(owner, repo, number);
    let changed = state.pause.pause(&key).await;
    Json(json!({ "key": key.to_string(), "paused": true, "changed": changed }))
}

async fn resume_pr(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, number)): Path<(String, String, u64)>,
) -> Json<serde_json::Value> {
    let key = PrKey::new(owner, repo, number);
    let changed = state.pause.resume(&key).await;
    Json(json!({ "key": key.to_string(), "paused": false, "changed": changed }))
}
