//! Stem combiner
//!
//! Reduces N audio artifacts to one mixed WAV: 44 100 Hz, stereo, 16-bit PCM.
//! Inputs are summed sample for sample; the output is as long as the longest
//! input and shorter inputs are padded with silence. No looping, truncation or
//! gain compensation.

pub mod ffmpeg;
pub mod native;

pub use ffmpeg::FfmpegCombiner;
pub use native::NativeCombiner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::store::{ArtifactNaming, ArtifactStore, ByteStream};

/// Output sample rate for every mix
pub const MIX_SAMPLE_RATE: u32 = 44_100;

/// Output channel count for every mix
pub const MIX_CHANNELS: u16 = 2;

/// Mixes two or more audio files into one WAV file
#[async_trait]
pub trait StemCombiner: Send + Sync {
    /// Mix `inputs` into `output`. Failures map to `PipelineError::Upstream`.
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> PipelineResult<()>;
}

/// Selectable combiner implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinerBackend {
    #[default]
    Ffmpeg,
    Native,
}

impl std::str::FromStr for CombinerBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(CombinerBackend::Ffmpeg),
            "native" => Ok(CombinerBackend::Native),
            other => Err(PipelineError::Input(format!("Unknown combiner: {}", other))),
        }
    }
}

/// Mix `vocals` with `instrumentals` into a new `combined-…wav` artifact
///
/// With no instrumentals the vocals filename is returned unchanged and the
/// combiner is never invoked.
pub async fn combine_artifacts(
    store: &Arc<dyn ArtifactStore>,
    combiner: &dyn StemCombiner,
    vocals: &str,
    instrumentals: &[String],
) -> PipelineResult<String> {
    if instrumentals.is_empty() {
        tracing::debug!(vocals = %vocals, "No instrumentals, returning vocals unchanged");
        return Ok(vocals.to_string());
    }

    let mut inputs = Vec::with_capacity(instrumentals.len() + 1);
    inputs.push(store.local_path(vocals).await?);
    for name in instrumentals {
        inputs.push(store.local_path(name).await?);
    }

    let mixed_path = std::env::temp_dir().join(format!(
        "vxm-mix-{}.wav",
        uuid::Uuid::new_v4().simple()
    ));

    tracing::info!(inputs = inputs.len(), "Mixing stems");
    let stored = mix_and_store(store, combiner, &inputs, &mixed_path).await;

    if let Err(e) = tokio::fs::remove_file(&mixed_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %mixed_path.display(), error = %e, "Failed to remove mix scratch file");
        }
    }

    let filename = stored?;
    tracing::info!(filename = %filename, "Combined artifact stored");
    Ok(filename)
}

async fn mix_and_store(
    store: &Arc<dyn ArtifactStore>,
    combiner: &dyn StemCombiner,
    inputs: &[PathBuf],
    mixed_path: &Path,
) -> PipelineResult<String> {
    combiner.mix(inputs, mixed_path).await?;

    let file = tokio::fs::File::open(mixed_path)
        .await
        .map_err(|e| PipelineError::Upstream(format!("Mixer produced no output: {}", e)))?;
    let stream: ByteStream = Box::pin(tokio_util::io::ReaderStream::new(file));

    let naming = ArtifactNaming::purpose("combined").with_extension("wav");
    Ok(store.put_stream(&naming, stream).await?)
}
