//! PeerVault Shard Store
//!
//! Persistent, content-addressed local storage of erasure-coded shards with
//! integrity verification, quota enforcement, and expiry-driven garbage
//! collection. Backed by a flat shard directory plus a SQLite index; the two
//! are kept consistent behind a single-writer lock.

pub mod store;

pub use store::{ShardRecord, ShardStore, StorageStats};

use std::path::PathBuf;

/// Shard store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for shards and the index database
    pub data_dir: PathBuf,

    /// Maximum total shard bytes (0 = unlimited)
    pub quota_bytes: u64,
}

impl StorageConfig {
    /// Create a new storage config with the given root directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            quota_bytes: 0,
        }
    }

    /// Set the quota in gigabytes
    pub fn with_quota_gb(mut self, gb: u64) -> Self {
        self.quota_bytes = gb * 1024 * 1024 * 1024;
        self
    }

    /// Set the quota in bytes
    pub fn with_quota_bytes(mut self, bytes: u64) -> Self {
        self.quota_bytes = bytes;
        self
    }
}
