//! Configuration management for a PeerVault storage node
//!
//! Supports loading from TOML files, with CLI and environment variable
//! overrides layered on top. Built once at startup and passed into each
//! component; nothing reads configuration globally.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Coordinator connection
    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    /// Node-local settings
    #[serde(default)]
    pub node: NodeSettings,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        coordinator_url: Option<String>,
        data_dir: Option<PathBuf>,
        port: Option<u16>,
    ) -> Self {
        if let Some(url) = coordinator_url {
            self.coordinator.url = url;
        }
        if let Some(dir) = data_dir {
            self.node.data_dir = dir;
        }
        if let Some(p) = port {
            self.node.port = p;
        }
        self
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PEERVAULT_COORDINATOR_URL") {
            self.coordinator.url = url;
        }
        if let Ok(dir) = std::env::var("PEERVAULT_DATA_DIR") {
            self.node.data_dir = PathBuf::from(dir);
        }
        if let Ok(port) = std::env::var("PEERVAULT_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                self.node.port = p;
            }
        }
        if let Ok(gb) = std::env::var("PEERVAULT_MAX_STORAGE_GB") {
            if let Ok(gb) = gb.parse::<u64>() {
                self.node.max_storage_gb = gb;
            }
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.port == 0 {
            return Err(ConfigError::ValidationError(
                "node port cannot be 0".to_string(),
            ));
        }
        if self.node.shards_required == 0 {
            return Err(ConfigError::ValidationError(
                "shards_required must be > 0".to_string(),
            ));
        }
        if self.node.shards_required >= self.node.shards_total {
            return Err(ConfigError::ValidationError(format!(
                "shards_total ({}) must exceed shards_required ({})",
                self.node.shards_total, self.node.shards_required
            )));
        }
        if self.node.redundancy_factor == 0 {
            return Err(ConfigError::ValidationError(
                "redundancy_factor must be > 0".to_string(),
            ));
        }
        if !self.node.data_dir.exists() {
            std::fs::create_dir_all(&self.node.data_dir).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Cannot create data directory {:?}: {}",
                    self.node.data_dir, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Coordinator connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub url: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
        }
    }
}

fn default_coordinator_url() -> String {
    "http://localhost:8000".to_string()
}

/// Node-local settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Root for all on-disk state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local peer-service port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address advertised to the coordinator (auto-detected when unset)
    #[serde(default)]
    pub public_address: Option<String>,

    /// Shard store quota in GB (0 = unlimited)
    #[serde(default = "default_max_storage_gb")]
    pub max_storage_gb: u64,

    /// Peer copies per shard the store pipeline aims for
    #[serde(default = "default_redundancy_factor")]
    pub redundancy_factor: usize,

    /// Total erasure shards per file (n)
    #[serde(default = "default_shards_total")]
    pub shards_total: usize,

    /// Shards required for reconstruction (k)
    #[serde(default = "default_shards_required")]
    pub shards_required: usize,

    /// Peer discovery tick period in seconds
    #[serde(default = "default_discovery_interval")]
    pub peer_discovery_interval_secs: u64,

    /// Audit sweep period in seconds
    #[serde(default = "default_audit_interval")]
    pub audit_interval_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            port: default_port(),
            public_address: None,
            max_storage_gb: default_max_storage_gb(),
            redundancy_factor: default_redundancy_factor(),
            shards_total: default_shards_total(),
            shards_required: default_shards_required(),
            peer_discovery_interval_secs: default_discovery_interval(),
            audit_interval_secs: default_audit_interval(),
        }
    }
}

impl NodeSettings {
    /// Quota in bytes (0 = unlimited)
    pub fn quota_bytes(&self) -> u64 {
        self.max_storage_gb * 1024 * 1024 * 1024
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./peervault_data")
}

fn default_port() -> u16 {
    9000
}

fn default_max_storage_gb() -> u64 {
    10
}

fn default_redundancy_factor() -> usize {
    4
}

fn default_shards_total() -> usize {
    peervault_core::SHARDS_TOTAL
}

fn default_shards_required() -> usize {
    peervault_core::SHARDS_REQUIRED
}

fn default_discovery_interval() -> u64 {
    30
}

fn default_audit_interval() -> u64 {
    300
}
