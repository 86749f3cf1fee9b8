//! Per-stage endpoints
//!
//! Each endpoint runs exactly one stage. References in and out use the
//! `/api/audio?file=…` token form for local artifacts and full URLs for remote
//! ones.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::reference::{AudioReference, Instrumental};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparateRequest {
    pub filename: Option<String>,
    pub audio_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparateResponse {
    pub success: bool,
    pub vocals_url: AudioReference,
    pub instrumental_url: Instrumental,
    pub degraded: bool,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub audio_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub converted_url: AudioReference,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineRequest {
    pub vocals_url: Option<String>,
    /// Bare token or `{"type": "multi", "stems": [...]}`
    pub instrumental_url: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineResponse {
    pub success: bool,
    pub combined_url: AudioReference,
}

fn required(value: Option<String>, field: &str) -> ApiResult<AudioReference> {
    let token = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))?;
    Ok(AudioReference::parse(&token)?)
}

/// POST /api/separate-vocals
///
/// **Request:** `{"filename": "…"}` or `{"audioUrl": "…"}`
pub async fn separate_vocals(
    State(state): State<AppState>,
    Json(request): Json<SeparateRequest>,
) -> ApiResult<Json<SeparateResponse>> {
    let reference = required(request.filename.or(request.audio_url), "filename or audioUrl")?;
    let outcome = state.pipeline.separate(&reference).await?;

    Ok(Json(SeparateResponse {
        success: true,
        vocals_url: outcome.vocals,
        instrumental_url: outcome.instrumental,
        degraded: outcome.degraded,
        cached: outcome.cached,
    }))
}

/// POST /api/convert-voice
pub async fn convert_voice(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<Json<ConvertResponse>> {
    let reference = required(request.audio_url, "audioUrl")?;
    let outcome = state.pipeline.convert(&reference).await?;

    Ok(Json(ConvertResponse {
        success: true,
        converted_url: outcome.converted,
        cached: outcome.cached,
    }))
}

/// POST /api/combine-audio
///
/// Without `instrumentalUrl` the vocals come back unchanged.
pub async fn combine_audio(
    State(state): State<AppState>,
    Json(request): Json<CombineRequest>,
) -> ApiResult<Json<CombineResponse>> {
    let vocals = required(request.vocals_url, "vocalsUrl")?;

    let instrumental = match request.instrumental_url {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => Some(
            serde_json::from_value::<Instrumental>(value)
                .map_err(|e| ApiError::BadRequest(format!("Invalid instrumentalUrl: {}", e)))?,
        ),
    };

    let outcome = state
        .pipeline
        .combine(&vocals, instrumental.as_ref())
        .await?;

    Ok(Json(CombineResponse {
        success: true,
        combined_url: outcome.combined,
    }))
}

pub fn stage_routes() -> Router<AppState> {
    Router::new()
        .route("/api/separate-vocals", post(separate_vocals))
        .route("/api/convert-voice", post(convert_voice))
        .route("/api/combine-audio", post(combine_audio))
}
