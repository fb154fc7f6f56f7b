//! Configuration loading for choreo-server.
//!
//! Configuration is loaded from a TOML file (default: `choreo.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for choreo-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Listener configuration.
    #[serde(default)]
    pub server: ListenConfig,
    /// Coordination protocol timing.
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:7400).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Coordination protocol timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// How long a participant waits without the run advancing (default: 30).
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// Shortest delay between polls in milliseconds (default: 10).
    #[serde(default = "default_poll_interval_min_ms")]
    pub poll_interval_min_ms: u64,
    /// Longest delay between polls in milliseconds (default: 500).
    #[serde(default = "default_poll_interval_max_ms")]
    pub poll_interval_max_ms: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_receipt_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_min_ms() -> u64 {
    10
}

fn default_poll_interval_max_ms() -> u64 {
    500
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: default_receipt_timeout_secs(),
            poll_interval_min_ms: default_poll_interval_min_ms(),
            poll_interval_max_ms: default_poll_interval_max_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ProtocolConfig {
    /// Receipt timeout as a duration.
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// Shortest delay between polls.
    pub fn poll_interval_min(&self) -> Duration {
        Duration::from_millis(self.poll_interval_min_ms)
    }

    /// Longest delay between polls.
    pub fn poll_interval_max(&self) -> Duration {
        Duration::from_millis(self.poll_interval_max_ms.max(self.poll_interval_min_ms))
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
