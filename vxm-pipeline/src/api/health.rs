//! Liveness endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

const MODULE_NAME: &str = "vxm-pipeline";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Idle time after which artifacts are reclaimed
    pub artifact_ttl_seconds: u64,
    pub max_upload_bytes: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    Json(HealthResponse {
        status: "ok",
        module: MODULE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        artifact_ttl_seconds: state.reclaimer.max_age().as_secs(),
        max_upload_bytes: state.max_upload_bytes,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
