//! Upload boundary
//!
//! `POST /api/upload-audio` stores the multipart `audio` field.
//! `POST /api/process` does the same and then runs the whole pipeline.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::orchestrator::{PipelineRequest, Upload};
use crate::reference::{AudioReference, Instrumental};
use crate::{ApiError, ApiResult, AppState};

const AUDIO_FIELD: &str = "audio";
const SEPARATE_FIELD: &str = "separate";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub audio_url: AudioReference,
    pub filename: String,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub success: bool,
    pub audio_url: AudioReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocals_url: Option<AudioReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrumental_url: Option<Instrumental>,
    pub degraded: bool,
    pub converted_url: AudioReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_url: Option<AudioReference>,
    pub result_url: AudioReference,
}

/// Parsed multipart form
struct UploadForm {
    upload: Upload,
    separate: bool,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Malformed multipart body: {}", err.body_text()))
    }
}

async fn read_form(mut multipart: Multipart, max_upload_bytes: usize) -> ApiResult<UploadForm> {
    let mut upload = None;
    let mut separate = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some(AUDIO_FIELD) => {
                let name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;

                if bytes.len() > max_upload_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "Upload is {} bytes, limit is {}",
                        bytes.len(),
                        max_upload_bytes
                    )));
                }

                let mut file = Upload::new(bytes.to_vec());
                if let Some(name) = name {
                    file = file.with_name(name);
                }
                if let Some(content_type) = content_type {
                    file = file.with_content_type(content_type);
                }
                upload = Some(file);
            }
            Some(SEPARATE_FIELD) => {
                let value = field.text().await.map_err(multipart_error)?;
                separate = matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "on" | "yes"
                );
            }
            _ => {}
        }
    }

    let upload =
        upload.ok_or_else(|| ApiError::BadRequest("No audio file provided".to_string()))?;
    Ok(UploadForm { upload, separate })
}

/// POST /api/upload-audio
pub async fn upload_audio(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let form = read_form(multipart, state.max_upload_bytes).await?;
    let outcome = state.pipeline.ingest(form.upload).await?;

    Ok(Json(UploadResponse {
        success: true,
        audio_url: outcome.reference,
        filename: outcome.filename,
        cached: outcome.cached,
    }))
}

/// POST /api/process
pub async fn process_audio(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let form = read_form(multipart, state.max_upload_bytes).await?;
    let outcome = state
        .pipeline
        .run(PipelineRequest {
            upload: form.upload,
            separate: form.separate,
        })
        .await?;

    let result_url = outcome.result().clone();
    let (vocals_url, instrumental_url, degraded) = match outcome.separation {
        Some(s) => (Some(s.vocals), Some(s.instrumental), s.degraded),
        None => (None, None, false),
    };

    Ok(Json(ProcessResponse {
        success: true,
        audio_url: outcome.ingest.reference,
        vocals_url,
        instrumental_url,
        degraded,
        converted_url: outcome.conversion.converted,
        combined_url: outcome.combine.map(|c| c.combined),
        result_url,
    }))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/upload-audio", post(upload_audio))
        .route("/api/process", post(process_audio))
}
