//! Artifact retrieval endpoint
//!
//! `GET /api/audio?file=<token>` streams a stored artifact back. Tokens are
//! reduced to their base name, so `../../etc/passwd` can only ever address an
//! artifact called `passwd`. Retrieval does not touch the artifact.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::reference::RETRIEVAL_PATH;
use crate::resolver::content_type_for;
use crate::store::{sanitize_filename, StoreError};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub file: Option<String>,
}

/// GET /api/audio?file=<token>
pub async fn get_audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
) -> ApiResult<Response> {
    let raw = query
        .file
        .ok_or_else(|| ApiError::BadRequest("file parameter is required".to_string()))?;
    let filename = sanitize_filename(&raw)?;

    let store = state.pipeline.store();
    let path = store.local_path(&filename).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound(filename.clone()),
        _ => ApiError::Pipeline(PipelineError::from(StoreError::Io(e))),
    })?;

    tracing::debug!(filename = %filename, "Serving artifact");

    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&filename)),
            (header::CACHE_CONTROL, "no-store"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response())
}

pub fn audio_routes() -> Router<AppState> {
    Router::new().route(RETRIEVAL_PATH, get(get_audio))
}
