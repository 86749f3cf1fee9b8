//! Local-directory artifact store
//!
//! Artifacts live as regular files in one flat directory. The file
//! modification time doubles as the last-touch time. Incoming writes go to
//! `.incoming/` first and are renamed into place only once complete, so a
//! reader never observes a half-written artifact.

use super::{
    sanitize_filename, ArtifactInfo, ArtifactNaming, ArtifactStore, ByteStream, StoreError,
    StoreResult, SweepReport,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use vxm_common::hash::{sha256_hex, StreamingHash};

const INCOMING_DIR: &str = ".incoming";

/// Artifact store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Open (and create if missing) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(INCOMING_DIR)).await?;
        tracing::debug!(root = %root.display(), "Artifact store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, filename: &str) -> StoreResult<(String, PathBuf)> {
        let name = sanitize_filename(filename)?;
        let path = self.root.join(&name);
        Ok((name, path))
    }

    fn incoming_path(&self) -> PathBuf {
        self.root
            .join(INCOMING_DIR)
            .join(format!("{}.part", uuid::Uuid::new_v4().simple()))
    }

    /// Move a completed partial file into place under `name`
    ///
    /// Content-hash names are idempotent: if the artifact already exists the
    /// partial is discarded and the existing file is touched instead.
    async fn commit(&self, partial: &Path, name: String, dedupe: bool) -> StoreResult<String> {
        let target = self.root.join(&name);

        if dedupe && is_file(&target).await {
            let _ = tokio::fs::remove_file(partial).await;
            self.touch(&name).await?;
            tracing::debug!(filename = %name, "Artifact already present, reusing");
            return Ok(name);
        }

        tokio::fs::rename(partial, &target).await?;
        tracing::debug!(filename = %name, "Artifact stored");
        Ok(name)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn map_not_found(err: std::io::Error, name: &str) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, naming: &ArtifactNaming, bytes: &[u8]) -> StoreResult<String> {
        let digest = if naming.is_content_hash() {
            sha256_hex(bytes)
        } else {
            String::new()
        };
        let name = naming.render(&digest);

        let partial = self.incoming_path();
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        self.commit(&partial, name, naming.is_content_hash()).await
    }

    async fn put_stream(
        &self,
        naming: &ArtifactNaming,
        mut stream: ByteStream,
    ) -> StoreResult<String> {
        let partial = self.incoming_path();
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut hasher = naming.is_content_hash().then(StreamingHash::new);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(StoreError::Stream(e.to_string()));
                }
            };

            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(StoreError::Io(e));
            }
            written += chunk.len() as u64;
        }

        file.sync_all().await?;
        drop(file);

        let digest = hasher.map(StreamingHash::finish).unwrap_or_default();
        let name = naming.render(&digest);
        tracing::debug!(filename = %name, bytes = written, "Streamed artifact complete");

        self.commit(&partial, name, naming.is_content_hash()).await
    }

    async fn get(&self, filename: &str) -> StoreResult<Vec<u8>> {
        let (name, path) = self.path_for(filename)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_not_found(e, &name))
    }

    async fn stat(&self, filename: &str) -> StoreResult<ArtifactInfo> {
        let (name, path) = self.path_for(filename)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_not_found(e, &name))?;

        if !metadata.is_file() {
            return Err(StoreError::NotFound(name));
        }

        let modified = metadata.modified()?;
        Ok(ArtifactInfo {
            filename: name,
            size: metadata.len(),
            last_touched: DateTime::<Utc>::from(modified),
        })
    }

    async fn exists(&self, filename: &str) -> StoreResult<bool> {
        let (_, path) = self.path_for(filename)?;
        Ok(is_file(&path).await)
    }

    async fn touch(&self, filename: &str) -> StoreResult<()> {
        let (name, path) = self.path_for(filename)?;

        let result = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_modified(SystemTime::now())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        result.map_err(|e| map_not_found(e, &name))
    }

    async fn local_path(&self, filename: &str) -> StoreResult<PathBuf> {
        let (name, path) = self.path_for(filename)?;
        if is_file(&path).await {
            Ok(path)
        } else {
            Err(StoreError::NotFound(name))
        }
    }

    async fn sweep(&self, max_age: Duration) -> StoreResult<SweepReport> {
        let mut report = SweepReport::default();

        // Abandoned partial writes age out on the same schedule
        for dir in [self.root.clone(), self.root.join(INCOMING_DIR)] {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "Sweep listing failed");
                        report.failed += 1;
                        break;
                    }
                };

                let path = entry.path();
                match sweep_entry(&path, max_age).await {
                    Ok(Some(removed)) => {
                        report.scanned += 1;
                        if removed {
                            report.removed += 1;
                            tracing::info!(file = %path.display(), "Reclaimed stale artifact");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.scanned += 1;
                        report.failed += 1;
                        tracing::warn!(file = %path.display(), error = %e, "Failed to reclaim artifact");
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Returns `None` for non-files, otherwise whether the file was removed
async fn sweep_entry(path: &Path, max_age: Duration) -> std::io::Result<Option<bool>> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Ok(None);
    }

    let age = SystemTime::now()
        .duration_since(metadata.modified()?)
        .unwrap_or(Duration::ZERO);

    if age <= max_age {
        return Ok(Some(false));
    }

    tokio::fs::remove_file(path).await?;
    Ok(Some(true))
}
