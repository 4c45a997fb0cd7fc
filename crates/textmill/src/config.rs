//! Runtime settings.
//!
//! Settings come from three layers, later layers winning: built-in defaults,
//! an optional TOML file, and `TEXTMILL_*` environment variables for the
//! handful of knobs operators change most often.

use crate::error::{Result, TextmillError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_dpi() -> u32 {
    300
}

fn default_batch_size() -> usize {
    10
}

fn default_page_workers() -> usize {
    2
}

fn default_extraction_url() -> String {
    "http://localhost:9998".to_string()
}

fn default_extraction_timeout_secs() -> u64 {
    60
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("data/results")
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache.db")
}

fn default_max_page_entries() -> usize {
    10_000
}

fn default_max_file_entries() -> usize {
    500
}

/// Result-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// SQLite database path holding both cache tables.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_page_entries")]
    pub max_page_entries: usize,

    #[serde(default = "default_max_file_entries")]
    pub max_file_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: default_cache_path(),
            max_page_entries: default_max_page_entries(),
            max_file_entries: default_max_file_entries(),
        }
    }
}

/// Pipeline and service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Render resolution for page bitmaps. 300 is the sweet spot for
    /// Tesseract accuracy.
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Pages rendered per backend call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent OCR workers.
    #[serde(default = "default_page_workers")]
    pub page_workers: usize,

    /// Render queue capacity; defaults to twice the batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Optional per-page OCR timeout in seconds. Off by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_timeout_secs: Option<u64>,

    /// Base URL of the remote text-extraction service.
    #[serde(default = "default_extraction_url")]
    pub extraction_url: String,

    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,

    /// Directory receiving per-job result artifacts.
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,

    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            batch_size: default_batch_size(),
            page_workers: default_page_workers(),
            queue_capacity: None,
            page_timeout_secs: None,
            extraction_url: default_extraction_url(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            result_dir: default_result_dir(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = toml::from_str(&content).map_err(|e| {
            TextmillError::validation(format!("Invalid settings file {}: {}", path.display(), e))
        })?;
        settings.apply_env();
        Ok(settings)
    }

    /// Built-in defaults plus environment overrides.
    pub fn load() -> Self {
        let mut settings = Settings::default();
        settings.apply_env();
        settings
    }

    /// Apply `TEXTMILL_*` environment overrides.
    fn apply_env(&mut self) {
        if let Some(dpi) = env_parse::<u32>("TEXTMILL_DPI") {
            self.dpi = dpi;
        }
        if let Some(workers) = env_parse::<usize>("TEXTMILL_PAGE_WORKERS") {
            self.page_workers = workers.max(1);
        }
        if let Ok(url) = std::env::var("TEXTMILL_EXTRACTION_URL") {
            if !url.is_empty() {
                self.extraction_url = url;
            }
        }
        if let Ok(dir) = std::env::var("TEXTMILL_RESULT_DIR") {
            if !dir.is_empty() {
                self.result_dir = PathBuf::from(dir);
            }
        }
    }

    /// Effective render-queue capacity (the backpressure knob).
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.batch_size.saturating_mul(2))
            .max(1)
    }

    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_secs.map(Duration::from_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(value) => match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!("Ignoring unparseable {} value: {}", name, value);
                None
            }
        },
        Err(_) => None,
    }
}
