//! Bootstrap configuration and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`STORYSTACK_CONFIG`, `STORYSTACK_ROOT_FOLDER`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! The TOML file is bootstrap only: it is read once at startup and a
//! missing file is not an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "STORYSTACK_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "STORYSTACK_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and local blob storage
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Classification service endpoint
    #[serde(default)]
    pub classifier: ClassifierSection,

    /// Import / auto-tag tuning; unset keys fall back to built-in defaults
    #[serde(default)]
    pub ingest: IngestSection,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[classifier]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierSection {
    /// Base URL of the classification service (e.g. `https://tags.example.com/v1`)
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key; `STORYSTACK_CLASSIFIER_API_KEY` takes priority
    #[serde(default)]
    pub api_key: Option<String>,

    /// Client-side request pacing
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

/// `[ingest]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSection {
    pub immediate_threshold: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub max_poll_attempts: Option<u32>,
    pub max_upload_bytes: Option<usize>,
    pub upload_concurrency: Option<usize>,
    pub event_capacity: Option<usize>,
    pub public_base_url: Option<String>,
}

/// Locate the config file: CLI path, then `STORYSTACK_CONFIG`, then the
/// per-user default. Returns `None` when no candidate exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("storystack").join("ingest.toml"))
        .filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Load the config file if one can be located, otherwise defaults.
///
/// An explicitly named file that cannot be read is an error; an absent
/// default file is not.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let config = load_toml_config(&path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        None => {
            info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Root folder resolution: CLI > ENV > TOML > OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("storystack"))
        .unwrap_or_else(|| PathBuf::from("./storystack_data"))
}

/// Database file inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("storystack.db")
}

/// Local blob storage directory inside a root folder
pub fn blob_root(root_folder: &Path) -> PathBuf {
    root_folder.join("blobs")
}
