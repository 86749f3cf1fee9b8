//! Result cache
//!
//! Maps a stage fingerprint to that stage's result payload plus the artifacts
//! the payload points at. An entry is only valid while all of those artifacts
//! still exist. Every successful lookup touches them, which pushes their
//! retention past the next reclamation sweep.
//!
//! Persistence sits behind [`CacheStore`] so the flat JSON document can be
//! swapped for a key-value store without touching stage logic.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileCacheStore;
pub use memory::MemoryCacheStore;

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use vxm_common::hash::sha256_hex;

use crate::reference::AudioReference;
use crate::store::{ArtifactStore, StoreError};

/// Pipeline stage, as used in fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Separate,
    Convert,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Separate => "separate",
            Stage::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic cache key: `<stage>:<input identity>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Raw-byte inputs are identified by their SHA-256
    pub fn of_bytes(stage: Stage, bytes: &[u8]) -> Self {
        Fingerprint(format!("{}:{}", stage, sha256_hex(bytes)))
    }

    /// Reference inputs are identified by their verbatim token
    pub fn of_reference(stage: Stage, reference: &AudioReference) -> Self {
        Fingerprint(format!("{}:{}", stage, reference.stable_identity()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Creation time, unix milliseconds
    pub timestamp: i64,
    /// Stage-specific result
    pub payload: serde_json::Value,
    /// Artifacts the payload depends on, in order
    #[serde(default)]
    pub files: Vec<String>,
}

/// Storage backend for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> vxm_common::Result<Option<CacheEntry>>;

    async fn save(&self, key: &str, entry: CacheEntry) -> vxm_common::Result<()>;

    async fn remove(&self, key: &str) -> vxm_common::Result<()>;
}

/// Typed cache facade that enforces dependency validity
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<dyn CacheStore>,
    artifacts: Arc<dyn ArtifactStore>,
    prune_stale: bool,
}

impl ResultCache {
    pub fn new(entries: Arc<dyn CacheStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            entries,
            artifacts,
            prune_stale: false,
        }
    }

    /// Remove entries eagerly once a dependency is found missing
    pub fn with_pruning(mut self, prune_stale: bool) -> Self {
        self.prune_stale = prune_stale;
        self
    }

    /// Look up a fingerprint
    ///
    /// Returns `None` on a miss, when any dependent artifact has vanished, or
    /// when the entry cannot be read back as `T`.
    pub async fn lookup<T: DeserializeOwned>(&self, fingerprint: &Fingerprint) -> Option<T> {
        let entry = match self.entries.load(fingerprint.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(key = %fingerprint, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %fingerprint, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        for file in &entry.files {
            match self.artifacts.touch(file).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) | Err(StoreError::InvalidName(_)) => {
                    tracing::info!(key = %fingerprint, file = %file, "Cache entry stale, dependency missing");
                    if self.prune_stale {
                        if let Err(e) = self.entries.remove(fingerprint.as_str()).await {
                            tracing::warn!(key = %fingerprint, error = %e, "Failed to prune stale cache entry");
                        }
                    }
                    return None;
                }
                Err(e) => {
                    tracing::warn!(key = %fingerprint, file = %file, error = %e, "Dependency touch failed, treating as miss");
                    return None;
                }
            }
        }

        match serde_json::from_value(entry.payload) {
            Ok(payload) => {
                tracing::debug!(key = %fingerprint, "Cache hit");
                Some(payload)
            }
            Err(e) => {
                tracing::warn!(key = %fingerprint, error = %e, "Cached payload has unexpected shape");
                None
            }
        }
    }

    /// Insert or overwrite an entry
    pub async fn store<T: Serialize>(
        &self,
        fingerprint: &Fingerprint,
        payload: &T,
        files: Vec<String>,
    ) -> vxm_common::Result<()> {
        let entry = CacheEntry {
            timestamp: Utc::now().timestamp_millis(),
            payload: serde_json::to_value(payload)?,
            files,
        };

        self.entries.save(fingerprint.as_str(), entry).await?;
        tracing::debug!(key = %fingerprint, "Cache entry stored");
        Ok(())
    }
}
