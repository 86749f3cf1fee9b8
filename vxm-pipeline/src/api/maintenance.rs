//! Maintenance endpoints

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub success: bool,
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
    pub max_age_secs: u64,
}

/// POST /api/maintenance/sweep
///
/// Runs one reclamation pass immediately, outside the schedule.
pub async fn sweep_now(State(state): State<AppState>) -> ApiResult<Json<SweepResponse>> {
    let report = state
        .reclaimer
        .run_once()
        .await
        .ok_or_else(|| ApiError::Internal("Reclamation sweep failed".to_string()))?;

    Ok(Json(SweepResponse {
        success: report.failed == 0,
        scanned: report.scanned,
        removed: report.removed,
        failed: report.failed,
        max_age_secs: state.reclaimer.max_age().as_secs(),
    }))
}

pub fn maintenance_routes() -> Router<AppState> {
    Router::new().route("/api/maintenance/sweep", post(sweep_now))
}
