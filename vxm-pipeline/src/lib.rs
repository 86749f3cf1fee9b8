//! vxm-pipeline library interface
//!
//! Exposes the pipeline core and the HTTP router for integration testing.

pub mod api;
pub mod cache;
pub mod combiner;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reference;
pub mod resolver;
pub mod services;
pub mod store;

pub use crate::error::{ApiError, ApiResult, PipelineError, PipelineResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::orchestrator::Pipeline;
use crate::store::Reclaimer;

/// Slack on top of the file limit for multipart framing and small fields
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Used by the maintenance sweep endpoint
    pub reclaimer: Reclaimer,
    /// Upload size limit in bytes
    pub max_upload_bytes: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, reclaimer: Reclaimer, max_upload_bytes: usize) -> Self {
        Self {
            pipeline,
            reclaimer,
            max_upload_bytes,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .merge(api::upload_routes())
        .merge(api::stage_routes())
        .merge(api::audio_routes())
        .merge(api::maintenance_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
