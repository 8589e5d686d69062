//! Configuration management for the feed multiplexer
//!
//! Loads configuration from config.toml at startup.
//! All values are configurable to avoid hardcoded constants.

use crate::ws::connection::ConnTuning;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Feed multiplexer configuration
///
/// Loaded from config.toml at startup. Contains connection tuning and the
/// provider endpoint map.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Connection tuning knobs
    #[serde(default)]
    pub feed: FeedConfig,

    /// Provider id -> WebSocket endpoint URL
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

/// Connection tuning configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Handshake deadline when opening a connection, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Interval between heartbeat pings, in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Silence threshold before a connection is declared dead, in seconds
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// First reconnect delay, in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Reconnect delay cap, in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_heartbeat_timeout_secs() -> u64 {
    45
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents)
                    .map_err(|e| ConfigError::ParseError(e.to_string()))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Check that every endpoint parses as a URL
    ///
    /// # Errors
    /// Returns the first endpoint that fails to parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (provider, endpoint) in &self.endpoints {
            if Url::parse(endpoint).is_err() {
                return Err(ConfigError::InvalidEndpoint {
                    provider: provider.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    /// Endpoint URL for a provider id, if configured
    pub fn endpoint(&self, provider: &str) -> Option<&str> {
        self.endpoints.get(provider).map(String::as_str)
    }

    /// Connection tuning derived from the `[feed]` section
    pub fn tuning(&self) -> ConnTuning {
        ConnTuning {
            heartbeat_interval: Duration::from_secs(self.feed.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.feed.heartbeat_timeout_secs),
            reconnect_initial: Duration::from_millis(self.feed.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.feed.reconnect_max_ms),
        }
    }

    /// Handshake deadline when opening a connection
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.connect_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
    /// Endpoint value is not a valid URL
    InvalidEndpoint { provider: String, endpoint: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::InvalidEndpoint { provider, endpoint } => {
                write!(f, "Invalid endpoint for provider {}: {}", provider, endpoint)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) => None,
            ConfigError::InvalidEndpoint { .. } => None,
        }
    }
}
