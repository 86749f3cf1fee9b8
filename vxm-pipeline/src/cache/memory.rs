//! In-memory cache store for tests and embedding

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &str) -> vxm_common::Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, entry: CacheEntry) -> vxm_common::Result<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> vxm_common::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
