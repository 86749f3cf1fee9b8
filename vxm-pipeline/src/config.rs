//! Configuration resolution for vxm-pipeline
//!
//! Service settings come from the module TOML file with compiled defaults.
//! The Replicate token is resolved ENV → TOML, warning when more than one
//! source is set.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use vxm_common::config::TomlConfig;
use vxm_common::{Error, Result};

use crate::combiner::CombinerBackend;
use crate::store::reclaim::{DEFAULT_ARTIFACT_TTL, DEFAULT_SWEEP_INTERVAL};

/// Default HTTP listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5780";

/// Default upload size limit (50 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

const TOKEN_ENV_VARS: [&str; 2] = ["VXM_REPLICATE_API_TOKEN", "REPLICATE_API_TOKEN"];

/// Effective service settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bind_address: String,
    pub artifact_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_upload_bytes: usize,
    pub combiner: CombinerBackend,
    pub ffmpeg_path: PathBuf,
    pub prune_stale_cache_entries: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            artifact_ttl: DEFAULT_ARTIFACT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            combiner: CombinerBackend::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            prune_stale_cache_entries: false,
        }
    }
}

impl PipelineConfig {
    /// Overlay TOML values on the compiled defaults
    pub fn from_toml(toml: &TomlConfig) -> Result<Self> {
        let defaults = Self::default();

        let combiner = match toml.combiner.as_deref() {
            Some(name) => name
                .parse::<CombinerBackend>()
                .map_err(|e| Error::Config(e.to_string()))?,
            None => defaults.combiner,
        };

        if toml.artifact_ttl_secs == Some(0) {
            return Err(Error::Config("artifact_ttl_secs must be positive".to_string()));
        }
        if toml.sweep_interval_secs == Some(0) {
            return Err(Error::Config("sweep_interval_secs must be positive".to_string()));
        }

        Ok(Self {
            bind_address: toml
                .bind_address
                .clone()
                .unwrap_or(defaults.bind_address),
            artifact_ttl: toml
                .artifact_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.artifact_ttl),
            sweep_interval: toml
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            max_upload_bytes: toml.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            combiner,
            ffmpeg_path: toml.ffmpeg_path.clone().unwrap_or(defaults.ffmpeg_path),
            prune_stale_cache_entries: toml
                .prune_stale_cache_entries
                .unwrap_or(defaults.prune_stale_cache_entries),
        })
    }
}

/// Resolve the Replicate API token
///
/// **Priority:** `VXM_REPLICATE_API_TOKEN` → `REPLICATE_API_TOKEN` → TOML
pub fn resolve_replicate_api_token(toml_config: &TomlConfig) -> Result<String> {
    let mut found: Vec<(&str, String)> = Vec::new();

    for var in TOKEN_ENV_VARS {
        if let Ok(token) = std::env::var(var) {
            if is_valid_token(&token) {
                found.push((var, token));
            }
        }
    }

    if let Some(token) = &toml_config.replicate_api_token {
        if is_valid_token(token) {
            found.push(("TOML", token.clone()));
        }
    }

    if found.len() > 1 {
        let sources: Vec<&str> = found.iter().map(|(source, _)| *source).collect();
        warn!(
            "Replicate API token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    match found.into_iter().next() {
        Some((source, token)) => {
            info!("Replicate API token loaded from {}", source);
            Ok(token.trim().to_string())
        }
        None => Err(Error::Config(
            "Replicate API token not configured. Set VXM_REPLICATE_API_TOKEN (or \
             REPLICATE_API_TOKEN), or add replicate_api_token to the TOML config"
                .to_string(),
        )),
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}
