//! Configuration management for lyceumd.
//!
//! Loads settings from `$LYCEUM_CONFIG`, then /etc/lyceum/config.toml, or uses
//! defaults.

use anyhow::{Context, Result};
use lyceum_shared::Catalog;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/lyceum/config.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "LYCEUM_CONFIG";

/// Compare-and-swap retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before a transaction reports a conflict
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff in milliseconds
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Jitter as a fraction of the backoff (0.2 = ±20%)
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_ms() -> u64 {
    5
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter_percent() -> f64 {
    0.20
}

fn default_max_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            factor: default_factor(),
            jitter_percent: default_jitter_percent(),
            max_ms: default_max_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_ms: self.base_ms,
            factor: self.factor,
            jitter_percent: self.jitter_percent,
            max_ms: self.max_ms,
        }
    }
}

/// Progression outbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Distinct users held before grants bypass the queue
    #[serde(default = "default_outbox_capacity")]
    pub capacity: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

fn default_outbox_capacity() -> usize {
    1024
}

fn default_flush_interval() -> u64 {
    30
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: default_outbox_capacity(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

/// Catalog source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON catalog; the built-in standard catalog when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub outbox: OutboxConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_PATH.to_string());
        Self::load_from_path(&path).unwrap_or_else(|e| {
            warn!("Config not found, using defaults: {:#}", e);
            Config::default()
        })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save default config to path (for init)
    pub fn save_default(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }

    /// The configured catalog, validated
    pub fn catalog(&self) -> Result<Catalog> {
        let catalog = match &self.catalog.path {
            Some(path) => Catalog::from_json_file(path)
                .with_context(|| format!("loading catalog {}", path.display()))?,
            None => Catalog::standard(),
        };
        catalog.validate()?;
        Ok(catalog)
    }
}
