//! Artifact store
//!
//! A flat namespace of byte blobs identified by filename tokens. Each artifact
//! carries a last-touch time; [`reclaim::Reclaimer`] deletes artifacts whose
//! last touch is older than the retention window. Every successful cache
//! lookup touches its dependent artifacts, which is what keeps reclamation
//! from deleting anything a valid cache entry still points at.
//!
//! The trait exists so shared blob storage can replace the local directory
//! without touching stage logic.

pub mod local;
pub mod reclaim;

pub use local::LocalArtifactStore;
pub use reclaim::Reclaimer;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Streamed body handed to [`ArtifactStore::put_stream`]
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Artifact store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Name was empty or consisted only of traversal segments
    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),

    /// The source stream failed before the artifact was complete
    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata for one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub size: u64,
    pub last_touched: DateTime<Utc>,
}

/// Outcome of one reclamation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// How a new artifact is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactNaming {
    /// `<sha256>[.<ext>]`: identical bytes always land on the same name
    ContentHash { extension: Option<String> },
    /// `<purpose>-<millis>-<random>[-<original>][.<ext>]`
    Purpose {
        purpose: String,
        original: Option<String>,
        extension: Option<String>,
    },
}

impl ArtifactNaming {
    pub fn content_hash(extension: Option<&str>) -> Self {
        ArtifactNaming::ContentHash {
            extension: extension.and_then(clean_extension),
        }
    }

    pub fn purpose(purpose: &str) -> Self {
        ArtifactNaming::Purpose {
            purpose: sanitize_original_name(purpose),
            original: None,
            extension: None,
        }
    }

    /// Append the sanitized stem of an original filename
    pub fn with_original(self, original: &str) -> Self {
        match self {
            ArtifactNaming::Purpose {
                purpose, extension, ..
            } => {
                let stem = Path::new(original)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = sanitize_original_name(&stem);
                ArtifactNaming::Purpose {
                    purpose,
                    original: (!stem.is_empty()).then_some(stem),
                    extension,
                }
            }
            other => other,
        }
    }

    pub fn with_extension(self, ext: &str) -> Self {
        let cleaned = clean_extension(ext);
        match self {
            ArtifactNaming::ContentHash { .. } => ArtifactNaming::ContentHash { extension: cleaned },
            ArtifactNaming::Purpose {
                purpose, original, ..
            } => ArtifactNaming::Purpose {
                purpose,
                original,
                extension: cleaned,
            },
        }
    }

    pub fn is_content_hash(&self) -> bool {
        matches!(self, ArtifactNaming::ContentHash { .. })
    }

    /// Render the final filename. `digest` is only used for content-hash names.
    pub(crate) fn render(&self, digest: &str) -> String {
        match self {
            ArtifactNaming::ContentHash { extension } => with_ext(digest.to_string(), extension),
            ArtifactNaming::Purpose {
                purpose,
                original,
                extension,
            } => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                let mut name = format!(
                    "{}-{}-{}",
                    purpose,
                    Utc::now().timestamp_millis(),
                    &suffix[..8]
                );
                if let Some(original) = original {
                    name.push('-');
                    name.push_str(original);
                }
                with_ext(name, extension)
            }
        }
    }
}

fn with_ext(mut name: String, extension: &Option<String>) -> String {
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(ext);
    }
    name
}

fn clean_extension(ext: &str) -> Option<String> {
    let cleaned: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Replace every character outside `[A-Za-z0-9.]` with `_` and lower-case
pub fn sanitize_original_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Normalize an externally supplied filename to its base name
///
/// `"../../etc/passwd"` becomes `"passwd"`. Names that reduce to nothing, or to
/// `.`/`..`, are rejected.
pub fn sanitize_filename(raw: &str) -> StoreResult<String> {
    let base = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(StoreError::InvalidName(raw.to_string()));
    }

    Ok(base.to_string())
}

/// Byte-addressable artifact storage with last-touch tracking
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a complete buffer, returning the new filename
    async fn put(&self, naming: &ArtifactNaming, bytes: &[u8]) -> StoreResult<String>;

    /// Store a streamed body without buffering it in memory
    async fn put_stream(&self, naming: &ArtifactNaming, stream: ByteStream)
        -> StoreResult<String>;

    async fn get(&self, filename: &str) -> StoreResult<Vec<u8>>;

    async fn stat(&self, filename: &str) -> StoreResult<ArtifactInfo>;

    async fn exists(&self, filename: &str) -> StoreResult<bool>;

    /// Reset the artifact's last-touch time to now
    async fn touch(&self, filename: &str) -> StoreResult<()>;

    /// Filesystem path of an existing artifact, for external tools
    async fn local_path(&self, filename: &str) -> StoreResult<PathBuf>;

    /// Delete every artifact whose last touch is older than `max_age`
    async fn sweep(&self, max_age: Duration) -> StoreResult<SweepReport>;
}
