//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// File-level configuration for pageline; every field has a default
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub api: ApiConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint: PathBuf,
    pub error_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("posts_with_comments.json"),
            output_dir: PathBuf::from("comments_data"),
            checkpoint: PathBuf::from("checkpoint.json"),
            error_log: PathBuf::from("errors.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: pageline_comments::api::DEFAULT_BASE_URL.to_string(),
            user_agent: pageline_comments::api::DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PacingConfig {
    pub batch_size: usize,
    pub delay_secs: f64,
    pub batch_delay_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            delay_secs: 0.4,
            batch_delay_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_secs: 10.0,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./pageline.toml (current directory)
    /// 2. ~/.config/pageline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("pageline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "pageline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Seconds from a config/flag value; rejects negative and non-finite input.
pub fn secs(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid {what}: {value}"))
}
