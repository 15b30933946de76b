//! Runtime configuration.
//!
//! # Responsibility
//! - Load the JSON configuration file that wires schemas, data and logs.
//! - Derive debounce settings per store.
//!
//! # Invariants
//! - Stores without an override use the global debounce window.
//! - An absent `data_dir` means stores live in memory only.

use crate::store::bootstrap::SqliteBootstrap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Debounce window used when nothing else is configured.
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-store overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOverrides {
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodestoreConfig {
    pub schema_dir: PathBuf,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreOverrides>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl LodestoreConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("schema_dir cannot be empty".to_string()));
        }
        if let Some(name) = self.stores.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "store override name cannot be blank: `{name}`"
            )));
        }
        Ok(())
    }

    /// Debounce settings consumed by the registry.
    pub fn save_settings(&self) -> SaveSettings {
        let mut settings = SaveSettings::new(Duration::from_millis(self.debounce_ms));
        for (name, overrides) in &self.stores {
            if let Some(ms) = overrides.debounce_ms {
                settings = settings.with_store(name.clone(), Duration::from_millis(ms));
            }
        }
        settings
    }

    /// File-backed bootstrap described by this config.
    pub fn bootstrap(&self) -> SqliteBootstrap {
        match &self.data_dir {
            Some(data_dir) => SqliteBootstrap::new(&self.schema_dir, data_dir),
            None => SqliteBootstrap::in_memory(&self.schema_dir),
        }
    }
}

/// Debounce windows: one default plus per-store overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSettings {
    default_debounce: Duration,
    per_store: BTreeMap<String, Duration>,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }
}

impl SaveSettings {
    pub fn new(default_debounce: Duration) -> Self {
        Self {
            default_debounce,
            per_store: BTreeMap::new(),
        }
    }

    pub fn with_store(mut self, name: impl Into<String>, debounce: Duration) -> Self {
        self.per_store.insert(name.into(), debounce);
        self
    }

    pub fn debounce_for(&self, name: &str) -> Duration {
        self.per_store
            .get(name)
            .copied()
            .unwrap_or(self.default_debounce)
    }
}
