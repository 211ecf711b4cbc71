//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Search order when no path is given explicitly:
//! `$XDG_CONFIG_HOME/agrotel/config.toml`, `/etc/agrotel/config.toml`,
//! `./config.toml`. If none exists the defaults are used. Environment
//! variables are applied last in every case.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::ApiConfig;
use crate::broadcast::HubConfig;
use crate::storage::StorageConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "agrotel=info,tower_http=info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("agrotel").join("config.toml")),
            Some(PathBuf::from("/etc/agrotel/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// An explicit path must load; otherwise fall back to the search order
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_with_env(path)?,
            None => Self::load_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "storage.pool_size must be at least 1".to_string(),
            ));
        }
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.hub.max_subscriptions == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_subscriptions must be at least 1".to_string(),
            ));
        }
        if self.hub.max_send_failures == 0 {
            return Err(ConfigError::Invalid(
                "hub.max_send_failures must be at least 1".to_string(),
            ));
        }
        if self.api.max_export_readings == 0 {
            return Err(ConfigError::Invalid(
                "api.max_export_readings must be at least 1".to_string(),
            ));
        }
        if self.api.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "api.max_body_bytes must be at least 1".to_string(),
            ));
        }
        if matches!(self.api.admin_token.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "api.admin_token must not be empty; remove it to disable admin routes".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format must be pretty or json, got '{}'",
                other
            ))),
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = lookup("AGROTEL_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        // API overrides
        if let Some(host) = lookup("AGROTEL_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("AGROTEL_PORT") {
            match port.parse() {
                Ok(p) => self.api.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid AGROTEL_PORT"),
            }
        }
        if let Some(token) = lookup("AGROTEL_ADMIN_TOKEN") {
            self.api.admin_token = Some(token).filter(|t| !t.is_empty());
        }

        // Logging overrides
        if let Some(level) = lookup("AGROTEL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("AGROTEL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Agrotel Configuration
#
# Environment variables override these settings:
# - AGROTEL_DATA_DIR
# - AGROTEL_HOST
# - AGROTEL_PORT
# - AGROTEL_ADMIN_TOKEN
# - AGROTEL_LOG_LEVEL
# - AGROTEL_LOG_FORMAT

[storage]
# Directory holding agrotel.db
data_dir = "agrotel_data"

# How long a writer waits on a locked database (ms)
busy_timeout_ms = 5000

# Maximum number of open database connections
pool_size = 8

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8000

# Allowed CORS origins ("*" allows any)
cors_origins = ["*"]

# Request timeout in seconds (WebSocket connections are exempt)
request_timeout_secs = 30

# Maximum request body size (bytes)
max_body_bytes = 65536

# Most readings one export may return; narrow since/until for more
max_export_readings = 100000

# Token required on device management routes; without it they are disabled
# admin_token = "change-me"

[hub]
# Live WebSocket subscriptions across all topics
max_subscriptions = 1000

# Messages buffered per connection before the oldest is dropped
queue_capacity = 256

# Consecutive send failures before a subscriber is evicted
max_send_failures = 3

[logging]
# Filter directive used when RUST_LOG is unset
level = "agrotel=info,tower_http=info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
