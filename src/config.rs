//! Server configuration
//!
//! Configuration is read from a TOML file with environment variable
//! overrides and sensible defaults, so the server starts with no
//! configuration at all.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Transport settings
    #[serde(default)]
    pub server: ServerSection,

    /// Data directory settings
    #[serde(default)]
    pub storage: StorageSection,

    /// Logging settings
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// Transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Address the RPC listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Data directory settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSection {
    /// Base directory holding one subdirectory per database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Open stores in recovery mode, tolerating truncated index files
    #[serde(default)]
    pub recovery: bool,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSection {
    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:19000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/metrodb")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            storage: StorageSection::default(),
            monitoring: MonitoringSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            recovery: false,
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {path}: {e}"))?;
        toml::from_str(&contents).map_err(|e| format!("failed to parse config file {path}: {e}"))
    }

    /// Defaults plus environment variable overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("METRODB_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("METRODB_DATA") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(recovery) = std::env::var("METRODB_RECOVERY") {
            self.storage.recovery = recovery == "1" || recovery.eq_ignore_ascii_case("true");
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = level;
        }
    }

    /// Reject configurations the server cannot start with
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.is_empty() {
            return Err("listen address cannot be empty".to_string());
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err("data directory cannot be empty".to_string());
        }
        Ok(())
    }
}
