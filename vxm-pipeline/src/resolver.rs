//! Reference resolver
//!
//! Turns an [`AudioReference`] into a concrete local artifact. Remote
//! locators are fetched and streamed straight into the store; nothing here
//! deduplicates, so resolving the same URL twice downloads it twice. The
//! result cache one layer up is what makes repeated work free.

use base64::Engine;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::reference::AudioReference;
use crate::store::{ArtifactNaming, ArtifactStore, ByteStream, StoreError};

const USER_AGENT: &str = concat!("vxm-pipeline/", env!("CARGO_PKG_VERSION"));

/// Content type for a stored artifact, derived from its extension
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Resolves local and remote references to local artifacts
pub struct ReferenceResolver {
    store: Arc<dyn ArtifactStore>,
    http: reqwest::Client,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn ArtifactStore>) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self::with_client(store, http))
    }

    pub fn with_client(store: Arc<dyn ArtifactStore>, http: reqwest::Client) -> Self {
        Self { store, http }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Materialize `reference` as a local artifact and return its filename
    ///
    /// `naming` is only used when a remote download creates a new artifact.
    pub async fn resolve(
        &self,
        reference: &AudioReference,
        naming: &ArtifactNaming,
    ) -> PipelineResult<String> {
        match reference {
            AudioReference::Local(name) => {
                if self.store.exists(name).await? {
                    Ok(name.clone())
                } else {
                    tracing::warn!(filename = %name, "Referenced artifact is gone");
                    Err(PipelineError::NotFound(name.clone()))
                }
            }
            AudioReference::Remote(url) => self.fetch_remote(url, naming).await,
        }
    }

    /// Download `url` into a new artifact without buffering the body
    pub async fn fetch_remote(
        &self,
        url: &reqwest::Url,
        naming: &ArtifactNaming,
    ) -> PipelineResult<String> {
        tracing::debug!(url = %url, "Fetching remote audio");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Fetch {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream(format!(
                "Fetch {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        let stream: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
            .boxed();

        let filename = self.store.put_stream(naming, stream).await.map_err(|e| match e {
            StoreError::Stream(msg) => {
                PipelineError::Upstream(format!("Fetch {} interrupted: {}", url, msg))
            }
            other => other.into(),
        })?;

        tracing::info!(url = %url, filename = %filename, "Remote audio stored");
        Ok(filename)
    }

    /// Render a local artifact as a `data:` URI for external services
    pub async fn read_as_data_uri(&self, filename: &str) -> PipelineResult<String> {
        let bytes = self.store.get(filename).await?;
        let mime = sniff_audio_mime(&bytes, filename);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(format!("data:{};base64,{}", mime, encoded))
    }
}

/// Best-effort mime type for audio bytes: content sniffing, then extension
pub fn sniff_audio_mime(bytes: &[u8], filename: &str) -> &'static str {
    if let Some(kind) = infer::get(bytes) {
        if matches!(
            kind.matcher_type(),
            infer::MatcherType::Audio | infer::MatcherType::Video
        ) {
            return kind.mime_type();
        }
    }

    match content_type_for(filename) {
        "application/octet-stream" => "audio/wav",
        known => known,
    }
}
