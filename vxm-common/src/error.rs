//! Shared error type for configuration and on-disk documents

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by `vxm-common` and the cache document backends
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing, unreadable or invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON document could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
