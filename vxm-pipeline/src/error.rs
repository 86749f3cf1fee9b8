//! Error types for vxm-pipeline
//!
//! `PipelineError` is the stage-level taxonomy. `ApiError` is the HTTP-facing
//! wrapper that renders `{"error": {"code", "message"}}` bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Stage failure taxonomy
///
/// No stage swallows one of these; any failure aborts the remaining stages of
/// the current request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid fields, oversize or non-audio upload. Not retriable.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Referenced local artifact is absent and presumed permanently lost
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// External service, remote fetch or mixing tool failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Separation output incomplete beyond the documented fallback chain
    #[error("Missing stems: {0}")]
    MissingStems(String),

    /// Disk I/O failure in the artifact store or cache document
    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => PipelineError::NotFound(name),
            StoreError::InvalidName(name) => {
                PipelineError::Input(format!("Invalid artifact name: {}", name))
            }
            StoreError::Stream(msg) => PipelineError::Upstream(msg),
            StoreError::Io(e) => PipelineError::Store(e.to_string()),
        }
    }
}

impl From<vxm_common::Error> for PipelineError {
    fn from(err: vxm_common::Error) -> Self {
        match err {
            vxm_common::Error::Config(msg) => PipelineError::Internal(msg),
            other => PipelineError::Store(other.to_string()),
        }
    }
}

/// Result type for pipeline stages
pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Stage failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Pipeline(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Pipeline(err) => match err {
                PipelineError::Input(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
                PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                PipelineError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
                PipelineError::MissingStems(msg) => {
                    (StatusCode::BAD_GATEWAY, "MISSING_STEMS", msg)
                }
                PipelineError::Store(msg) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", msg)
                }
                PipelineError::Internal(msg) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
                }
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
