// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for Kea-Roost
//!
//! Every value has a default, so running without a `roost.toml` is the
//! normal case. The file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RoostError};

/// Environment variable naming the directory holding the ledger binaries
pub const BIN_PATH_ENV: &str = "FABRIC_BIN_PATH";

/// Environment variable holding the root authority admin password
pub const CA_PASSWORD_ENV: &str = "FABRIC_CA_ADMIN_PASSWORD";

/// Main configuration structure for Roost
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Network naming
    #[serde(default)]
    pub network: NetworkConfig,

    /// External binaries
    #[serde(default)]
    pub binaries: BinariesConfig,

    /// Container images
    #[serde(default)]
    pub images: ImagesConfig,

    /// Readiness wait bounds
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Optional base templates for generated node and channel configs
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Names shared by every generated artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bridge network name, also the prefix of node service names
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Domain of the root organization
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Default channel name
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Host the authorities are reached on from the operator machine
    #[serde(default = "default_ca_host")]
    pub ca_host: String,

    /// Subject alternative names requested for TLS certificates
    #[serde(default = "default_csr_hosts")]
    pub csr_hosts: Vec<String>,
}

/// Location of the ledger binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinariesConfig {
    /// Directory containing fabric-ca-server, fabric-ca-client, configtxgen, osnadmin, peer
    pub path: Option<PathBuf>,
}

/// Container images per service kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_ca_image")]
    pub ca: String,

    #[serde(default = "default_peer_image")]
    pub peer: String,

    #[serde(default = "default_orderer_image")]
    pub orderer: String,
}

/// Bounds for every readiness wait
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// How long to wait for an authority to publish its certificate
    #[serde(default = "default_ca_timeout")]
    pub ca_timeout_secs: u64,

    #[serde(default = "default_ca_poll")]
    pub ca_poll_ms: u64,

    /// How long to wait for an orderer admin endpoint to accept connections
    #[serde(default = "default_orderer_timeout")]
    pub orderer_timeout_secs: u64,

    #[serde(default = "default_orderer_poll")]
    pub orderer_poll_ms: u64,

    /// Per-attempt connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Pause after the admin endpoint first accepts a connection
    #[serde(default = "default_grace")]
    pub orderer_grace_ms: u64,

    /// Upper bound on any single ledger tool or compose invocation
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
}

/// Operator-supplied base documents, merged under the generated values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    pub core: Option<PathBuf>,
    pub orderer: Option<PathBuf>,
    pub configtx: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include the event target in each line
    #[serde(default)]
    pub with_target: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            domain: default_domain(),
            channel: default_channel(),
            ca_host: default_ca_host(),
            csr_hosts: default_csr_hosts(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            ca: default_ca_image(),
            peer: default_peer_image(),
            orderer: default_orderer_image(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            ca_timeout_secs: default_ca_timeout(),
            ca_poll_ms: default_ca_poll(),
            orderer_timeout_secs: default_orderer_timeout(),
            orderer_poll_ms: default_orderer_poll(),
            connect_timeout_ms: default_connect_timeout(),
            orderer_grace_ms: default_grace(),
            process_timeout_secs: default_process_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            with_target: false,
        }
    }
}

impl ReadinessConfig {
    pub fn ca_timeout(&self) -> Duration {
        Duration::from_secs(self.ca_timeout_secs)
    }

    pub fn ca_poll(&self) -> Duration {
        Duration::from_millis(self.ca_poll_ms)
    }

    pub fn orderer_timeout(&self) -> Duration {
        Duration::from_secs(self.orderer_timeout_secs)
    }

    pub fn orderer_poll(&self) -> Duration {
        Duration::from_millis(self.orderer_poll_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn orderer_grace(&self) -> Duration {
        Duration::from_millis(self.orderer_grace_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RoostError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.name.is_empty() {
            return Err(RoostError::InvalidConfig {
                message: "network name cannot be empty".to_string(),
            });
        }

        if self.network.channel.is_empty() {
            return Err(RoostError::InvalidConfig {
                message: "channel name cannot be empty".to_string(),
            });
        }

        if self.readiness.ca_poll_ms == 0 || self.readiness.orderer_poll_ms == 0 {
            return Err(RoostError::InvalidConfig {
                message: "readiness poll intervals must be non-zero".to_string(),
            });
        }

        if self.readiness.process_timeout_secs == 0 {
            return Err(RoostError::InvalidConfig {
                message: "process_timeout_secs must be non-zero".to_string(),
            });
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(RoostError::InvalidConfig {
                message: format!("unknown log format '{}'", self.logging.format),
            });
        }

        Ok(())
    }

    /// Resolve the binaries directory, preferring the environment
    pub fn bin_path(&self) -> Option<PathBuf> {
        std::env::var_os(BIN_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.binaries.path.clone())
    }
}

// Default value functions

fn default_network_name() -> String {
    "pm3".to_string()
}

fn default_domain() -> String {
    "pm3.org".to_string()
}

fn default_channel() -> String {
    "pm3".to_string()
}

fn default_ca_host() -> String {
    "localhost".to_string()
}

fn default_csr_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "*.pm3.org".to_string()]
}

fn default_ca_image() -> String {
    "hyperledger/fabric-ca:1.5".to_string()
}

fn default_peer_image() -> String {
    "hyperledger/fabric-peer:2.5".to_string()
}

fn default_orderer_image() -> String {
    "hyperledger/fabric-orderer:2.5".to_string()
}

fn default_ca_timeout() -> u64 {
    30
}

fn default_ca_poll() -> u64 {
    1000
}

fn default_orderer_timeout() -> u64 {
    30
}

fn default_orderer_poll() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_grace() -> u64 {
    2000
}

fn default_process_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.name, "pm3");
        assert_eq!(config.network.channel, "pm3");
        assert_eq!(config.readiness.ca_timeout(), Duration::from_secs(30));
        assert_eq!(config.readiness.orderer_poll(), Duration::from_millis(500));
        assert_eq!(config.readiness.process_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_channel() {
        let mut config = Config::default();
        config.network.channel = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_poll() {
        let mut config = Config::default();
        config.readiness.ca_poll_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_process_timeout() {
        let mut config = Config::default();
        config.readiness.process_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let err = Config::from_file("/nonexistent/roost.toml").unwrap_err();
        assert!(matches!(err, RoostError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_content = r#"
            [network]
            name = "lab"
            channel = "trade"

            [binaries]
            path = "/opt/fabric/bin"

            [readiness]
            ca_timeout_secs = 5
            orderer_grace_ms = 0
            process_timeout_secs = 60

            [templates]
            core = "/etc/roost/core.yaml"

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.network.name, "lab");
        assert_eq!(config.network.domain, "pm3.org");
        assert_eq!(config.network.channel, "trade");
        assert_eq!(config.binaries.path, Some(PathBuf::from("/opt/fabric/bin")));
        assert_eq!(config.readiness.ca_timeout_secs, 5);
        assert_eq!(config.readiness.ca_poll_ms, 1000);
        assert_eq!(config.readiness.process_timeout(), Duration::from_secs(60));
        assert_eq!(config.images.peer, "hyperledger/fabric-peer:2.5");
        assert!(config.templates.core.is_some());
        assert_eq!(config.logging.level, "debug");
    }
}
