//! Engine configuration.
//!
//! One TOML file configures both the embedded coordination server and the
//! runtime engine:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:7400"
//!
//! [protocol]
//! receipt_timeout_secs = 2
//!
//! [runtime]
//! stop_grace_secs = 5
//! compose_project = "kv-leader-change"
//! advertise_address = "172.17.0.1:7400"
//! ```

use choreo_server::{ConfigError, ServerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a choreographed run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Coordination server configuration (`[server]`, `[protocol]`, `[http]`).
    #[serde(flatten)]
    pub coordination: ServerConfig,
    /// Runtime engine configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Runtime engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds a node gets to stop before it is killed (default: 10).
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Docker Compose project the node containers belong to.
    /// A unique `choreo-<uuid>` name is generated when absent.
    #[serde(default)]
    pub compose_project: Option<String>,
    /// Interface partition rules apply to (default: eth0).
    #[serde(default = "default_network_interface")]
    pub network_interface: String,
    /// File libfaketime reads the clock offset from (default: /etc/faketimerc).
    #[serde(default = "default_clock_drift_file")]
    pub clock_drift_file: PathBuf,
    /// Server address published to nodes; the bound address when absent.
    #[serde(default)]
    pub advertise_address: Option<String>,
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_network_interface() -> String {
    "eth0".to_string()
}

fn default_clock_drift_file() -> PathBuf {
    PathBuf::from("/etc/faketimerc")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
            compose_project: None,
            network_interface: default_network_interface(),
            clock_drift_file: default_clock_drift_file(),
            advertise_address: None,
        }
    }
}

impl RuntimeConfig {
    /// Grace period before a stop escalates to a kill.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// The configured compose project, or a fresh unique one.
    pub fn project_name(&self) -> String {
        self.compose_project
            .clone()
            .unwrap_or_else(|| format!("choreo-{}", uuid::Uuid::new_v4().as_simple()))
    }
}

impl EngineConfig {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime.stop_grace(), Duration::from_secs(10));
        assert_eq!(config.runtime.network_interface, "eth0");
        assert_eq!(config.coordination.protocol.receipt_timeout_secs, 30);
    }

    #[test]
    fn sections_share_one_file() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:0"

[protocol]
receipt_timeout_secs = 2

[runtime]
stop_grace_secs = 3
compose_project = "kv-test"
advertise_address = "172.17.0.1:7400"
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.coordination.server.bind_address, "127.0.0.1:0");
        assert_eq!(
            config.coordination.protocol.receipt_timeout(),
            Duration::from_secs(2)
        );
        assert_eq!(config.runtime.stop_grace_secs, 3);
        assert_eq!(config.runtime.project_name(), "kv-test");
        assert_eq!(
            config.runtime.advertise_address.as_deref(),
            Some("172.17.0.1:7400")
        );
        assert!(config.coordination.http.metrics_enabled);
    }

    #[test]
    fn generated_project_names_are_unique() {
        let runtime = RuntimeConfig::default();
        let a = runtime.project_name();
        let b = runtime.project_name();
        assert_ne!(a, b);
        assert!(a.starts_with("choreo-"));
    }
}
