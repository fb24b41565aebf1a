// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub sync: SyncConfig,
    pub debug: DebugConfig,
    pub graph: GraphConfig,
}

/// Instance / device creation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub app_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "vkgraph".to_string(),
        }
    }
}

/// Default timeouts for CPU-side waits
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub fence_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 1000,
        }
    }
}

impl SyncConfig {
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// One of error / warn / info / debug / trace; `RUST_LOG` wins when set
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vkgraph.log".to_string(),
        }
    }
}

/// Render graph used by the demo binary
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct GraphConfig {
    /// TOML render graph description; the built-in forward pass when unset
    pub description: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Log level as a filter; unknown names fall back to Info
    pub fn log_level(&self) -> log::LevelFilter {
        match self.debug.log_level.to_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "info" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => {
                log::warn!("Unknown log level '{}', defaulting to info", self.debug.log_level);
                log::LevelFilter::Info
            }
        }
    }
}
