//! Single-document JSON cache store
//!
//! The whole mapping lives in one file. Each call is a whole-document
//! read-modify-write. A process-local mutex serializes writers inside one
//! process; two processes sharing the file can still lose an update, which
//! only costs a recomputation later.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{CacheEntry, CacheStore};

type Document = BTreeMap<String, CacheEntry>;

/// Cache store persisted as one JSON document
pub struct JsonFileCacheStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document; missing or unparseable reads as empty
    async fn read_document(&self) -> vxm_common::Result<Document> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Document::new());
        }

        match serde_json::from_str(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cache document unreadable, starting fresh");
                Ok(Document::new())
            }
        }
    }

    async fn write_document(&self, doc: &Document) -> vxm_common::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        let temp_path = self.path.with_extension(format!(
            "json.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for JsonFileCacheStore {
    async fn load(&self, key: &str) -> vxm_common::Result<Option<CacheEntry>> {
        let mut doc = self.read_document().await?;
        Ok(doc.remove(key))
    }

    async fn save(&self, key: &str, entry: CacheEntry) -> vxm_common::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        doc.insert(key.to_string(), entry);
        self.write_document(&doc).await
    }

    async fn remove(&self, key: &str) -> vxm_common::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        if doc.remove(key).is_some() {
            self.write_document(&doc).await?;
        }
        Ok(())
    }
}
