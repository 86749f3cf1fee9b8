//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `VXM_ROOT_FOLDER`, then `VXM_ROOT` environment variables
//! 3. `root_folder` key of the module TOML file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup: the module logs a
//! warning and continues on defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the cache document inside the root folder
pub const CACHE_DOCUMENT_NAME: &str = "cache.json";

/// Name of the flat artifact directory inside the root folder
pub const ARTIFACT_DIR_NAME: &str = "artifacts";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Optional log file; stdout when absent
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Module TOML configuration (`~/.config/vxm/<module>.toml`)
///
/// Every field is optional so older files keep parsing as fields are added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    /// Replicate API token used for separation and voice conversion
    pub replicate_api_token: Option<String>,
    /// Socket address for the HTTP listener, e.g. "127.0.0.1:5790"
    pub bind_address: Option<String>,
    /// Seconds an untouched artifact survives before reclamation
    pub artifact_ttl_secs: Option<u64>,
    /// Seconds between reclamation sweeps
    pub sweep_interval_secs: Option<u64>,
    /// Upload size limit in bytes
    pub max_upload_bytes: Option<usize>,
    /// Mixing backend: "ffmpeg" or "native"
    pub combiner: Option<String>,
    /// Path to the ffmpeg binary
    pub ffmpeg_path: Option<PathBuf>,
    /// Remove cache entries whose dependencies vanished
    pub prune_stale_cache_entries: Option<bool>,
}

impl TomlConfig {
    /// Load the TOML file for a module, falling back to defaults
    pub fn load_for_module(module_name: &str) -> Self {
        let Some(path) = module_config_path(module_name) else {
            warn!(module = module_name, "Could not determine config directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            debug!(path = %path.display(), "No TOML config file, using defaults");
            return Self::default();
        }

        match load_toml_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable TOML config");
                Self::default()
            }
        }
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML config file atomically (temp file + rename)
///
/// On Unix the file is created with 0600 permissions since it may carry an
/// API token.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Path of the module TOML file for the current user
pub fn module_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vxm").join(format!("{}.toml", module_name)))
}

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            dirs::data_local_dir()
                .map(|d| d.join("vxm"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/vxm"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("vxm"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/vxm"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("vxm"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\vxm"))
        } else {
            PathBuf::from("./vxm_data")
        };

        Self { root_folder }
    }
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Supply a command-line override
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        for var in ["VXM_ROOT_FOLDER", "VXM_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(root) = TomlConfig::load_for_module(&self.module_name).root_folder {
            return root;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout on startup
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Flat directory holding every artifact
    pub fn artifact_dir(&self) -> PathBuf {
        self.root_folder.join(ARTIFACT_DIR_NAME)
    }

    /// Location of the shared cache document
    pub fn cache_path(&self) -> PathBuf {
        self.root_folder.join(CACHE_DOCUMENT_NAME)
    }

    /// Create the root and artifact directories (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.artifact_dir())?;
        Ok(())
    }
}
