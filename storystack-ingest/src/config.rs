//! Configuration resolution for storystack-ingest
//!
//! Tunables come from the `[ingest]` TOML table with built-in defaults.
//! Classification service settings resolve ENV → TOML.

use std::path::Path;
use std::time::Duration;
use storystack_common::config::{IngestSection, TomlConfig};
use storystack_common::{Error, Result};
use tracing::{info, warn};

/// Environment variable carrying the classification service API key
pub const CLASSIFIER_API_KEY_ENV_VAR: &str = "STORYSTACK_CLASSIFIER_API_KEY";

/// Environment variable overriding the classification service base URL
pub const CLASSIFIER_URL_ENV_VAR: &str = "STORYSTACK_CLASSIFIER_URL";

/// Below this many images a request goes out on the immediate path
pub const DEFAULT_IMMEDIATE_THRESHOLD: usize = 20;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
/// 90 attempts at 10s gives a batch roughly 15 minutes to resolve
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 90;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1_500_000;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

const MIN_UPLOAD_BYTES: usize = 64 * 1024;

/// Validated ingest tunables
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    pub immediate_threshold: usize,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_upload_bytes: usize,
    pub upload_concurrency: usize,
    pub event_capacity: usize,
    /// Base URL that blob paths are appended to; `None` means `file://<root>/blobs`
    pub public_base_url: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            immediate_threshold: DEFAULT_IMMEDIATE_THRESHOLD,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            public_base_url: None,
        }
    }
}

impl IngestSettings {
    /// Overlay the `[ingest]` table onto the defaults and validate
    pub fn from_section(section: &IngestSection) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            immediate_threshold: section
                .immediate_threshold
                .unwrap_or(defaults.immediate_threshold),
            poll_interval: section
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            max_poll_attempts: section
                .max_poll_attempts
                .unwrap_or(defaults.max_poll_attempts),
            max_upload_bytes: section.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            upload_concurrency: section
                .upload_concurrency
                .unwrap_or(defaults.upload_concurrency),
            event_capacity: section.event_capacity.unwrap_or(defaults.event_capacity),
            public_base_url: section
                .public_base_url
                .as_ref()
                .filter(|url| !url.trim().is_empty())
                .cloned(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.immediate_threshold == 0 {
            return Err(Error::Config(
                "ingest.immediate_threshold must be at least 1".to_string(),
            ));
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "ingest.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(Error::Config(
                "ingest.max_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(Error::Config(
                "ingest.upload_concurrency must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "ingest.event_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_upload_bytes < MIN_UPLOAD_BYTES {
            return Err(Error::Config(format!(
                "ingest.max_upload_bytes must be at least {} bytes",
                MIN_UPLOAD_BYTES
            )));
        }
        Ok(())
    }

    /// Public base URL for blobs stored under `blob_root`
    pub fn public_base_url_for(&self, blob_root: &Path) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("file://{}", blob_root.display()),
        }
    }
}

/// Classification service connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
}

/// Resolve classification service settings (ENV → TOML)
pub fn resolve_classifier_settings(toml_config: &TomlConfig) -> Result<ClassifierSettings> {
    let env_url = std::env::var(CLASSIFIER_URL_ENV_VAR).ok();
    let base_url = env_url
        .as_deref()
        .filter(|url| is_valid_key(url))
        .or_else(|| {
            toml_config
                .classifier
                .base_url
                .as_deref()
                .filter(|url| is_valid_key(url))
        })
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .ok_or_else(|| {
            Error::Config(format!(
                "Classification service URL not configured. Set one of:\n\
                 1. Environment: {}=https://...\n\
                 2. TOML: [classifier] base_url = \"https://...\"",
                CLASSIFIER_URL_ENV_VAR
            ))
        })?;

    Ok(ClassifierSettings {
        base_url,
        api_key: resolve_classifier_api_key(toml_config),
        requests_per_second: toml_config
            .classifier
            .requests_per_second
            .filter(|rps| *rps > 0)
            .unwrap_or(DEFAULT_REQUESTS_PER_SECOND),
    })
}

/// Resolve the classification API key (ENV → TOML)
///
/// A missing key is not an error; services without authentication accept
/// anonymous requests.
pub fn resolve_classifier_api_key(toml_config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(CLASSIFIER_API_KEY_ENV_VAR)
        .ok()
        .filter(|key| is_valid_key(key));
    let toml_key = toml_config
        .classifier
        .api_key
        .clone()
        .filter(|key| is_valid_key(key));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Classifier API key found in environment and TOML. Using environment.");
    }

    if let Some(key) = env_key {
        info!("Classifier API key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_key {
        info!("Classifier API key loaded from TOML config");
        return Some(key);
    }
    None
}

/// Blank or whitespace-only values count as absent
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
