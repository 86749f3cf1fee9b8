//! ffmpeg-backed combiner
//!
//! Usage: `ffmpeg -y -i a -i b … -filter_complex amix=… -c:a pcm_s16le -ar 44100 -ac 2 out.wav`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{StemCombiner, MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::error::{PipelineError, PipelineResult};

const DEFAULT_FFMPEG: &str = "ffmpeg";

/// Mixes by shelling out to an ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegCombiner {
    binary_path: PathBuf,
}

impl Default for FfmpegCombiner {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG)
    }
}

impl FfmpegCombiner {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Check whether the binary runs at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Full argument list for one mix
    pub fn arguments(inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string()];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args.push("-filter_complex".to_string());
        args.push(format!(
            "amix=inputs={}:duration=longest:dropout_transition=0:normalize=0",
            inputs.len()
        ));
        args.extend([
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            MIX_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            MIX_CHANNELS.to_string(),
        ]);
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl StemCombiner for FfmpegCombiner {
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> PipelineResult<()> {
        if inputs.len() < 2 {
            return Err(PipelineError::Input(format!(
                "Mixing needs at least two inputs, got {}",
                inputs.len()
            )));
        }

        let args = Self::arguments(inputs, output);
        tracing::debug!(binary = %self.binary_path.display(), args = ?args, "Running ffmpeg");

        let result = tokio::task::spawn_blocking({
            let binary = self.binary_path.clone();
            move || Command::new(&binary).args(&args).output()
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Task join error: {}", e)))?
        .map_err(|e| {
            PipelineError::Upstream(format!(
                "Failed to start {}: {}",
                self.binary_path.display(),
                e
            ))
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(PipelineError::Upstream(format!(
                "ffmpeg exited with {:?}: {}",
                result.status.code(),
                stderr
            )));
        }

        tracing::info!(inputs = inputs.len(), output = %output.display(), "ffmpeg mix finished");
        Ok(())
    }
}
