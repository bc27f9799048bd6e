//! Configuration management for geobridge
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::publish::MetadataPolicy;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Persisted settings (server registry)
    pub settings: SettingsConfig,

    /// HTTP client configuration for catalog servers
    pub http: HttpConfig,

    /// Publishing policy
    pub publish: PublishConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Settings store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// SQLite file holding named settings
    pub path: PathBuf,
}

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for idempotent requests
    pub max_retries: u32,

    /// User agent string
    pub user_agent: String,
}

/// Publishing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Whether layers with invalid metadata may still be published
    #[serde(default)]
    pub allow_without_metadata: MetadataPolicy,

    /// Directory receiving exported layer files before upload
    pub export_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let settings_path = std::env::var("GEOBRIDGE_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.settings.path);

        let timeout_secs = std::env::var("GEOBRIDGE_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.http.timeout_secs);

        let max_retries = std::env::var("GEOBRIDGE_HTTP_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.http.max_retries);

        let user_agent =
            std::env::var("GEOBRIDGE_USER_AGENT").unwrap_or(defaults.http.user_agent);

        let allow_without_metadata = match std::env::var("GEOBRIDGE_ALLOW_WITHOUT_METADATA") {
            Ok(value) => value
                .parse::<MetadataPolicy>()
                .map_err(anyhow::Error::msg)
                .context("Invalid GEOBRIDGE_ALLOW_WITHOUT_METADATA")?,
            Err(_) => defaults.publish.allow_without_metadata,
        };

        let export_dir = std::env::var("GEOBRIDGE_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.publish.export_dir);

        let level = std::env::var("GEOBRIDGE_LOG_LEVEL").unwrap_or(defaults.logging.level);
        let format = std::env::var("GEOBRIDGE_LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            settings: SettingsConfig {
                path: settings_path,
            },
            http: HttpConfig {
                timeout_secs,
                max_retries,
                user_agent,
            },
            publish: PublishConfig {
                allow_without_metadata,
                export_dir,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than 0");
        }

        if self.settings.path.as_os_str().is_empty() {
            anyhow::bail!("settings.path must not be empty");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Retry policy for idempotent catalog requests
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.http.max_retries)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: SettingsConfig {
                path: PathBuf::from("data/settings.db"),
            },
            http: HttpConfig {
                timeout_secs: 60,
                max_retries: 2,
                user_agent: format!("geobridge/{}", env!("CARGO_PKG_VERSION")),
            },
            publish: PublishConfig {
                allow_without_metadata: MetadataPolicy::Allow,
                export_dir: std::env::temp_dir().join("geobridge"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
