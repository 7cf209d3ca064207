//! Error types for PeerVault
//!
//! Provides a unified error type for all PeerVault operations.

use thiserror::Error;

/// Result type alias for PeerVault operations
pub type Result<T> = std::result::Result<T, PeerVaultError>;

/// Unified error type for PeerVault
#[derive(Error, Debug)]
pub enum PeerVaultError {
    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    Erasure(String),

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    // ===== Cryptography Errors =====
    #[error("Integrity check failed: wrong password or corrupted ciphertext")]
    Integrity,

    #[error("Crypto error: {0}")]
    Crypto(String),

    // ===== Shard Store Errors =====
    #[error("Storage quota exceeded: need {needed} bytes, quota {quota}")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Shard not found: file {file_hash} index {shard_index}")]
    ShardNotFound {
        file_hash: String,
        shard_index: usize,
    },

    #[error("Corrupt shard: file {file_hash} index {shard_index}")]
    CorruptShard {
        file_hash: String,
        shard_index: usize,
    },

    #[error("Shard store corrupt: {0}")]
    StoreCorrupt(String),

    // ===== Network Errors =====
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout contacting {peer}")]
    Timeout { peer: String },

    #[error("Coordinator rejected request ({status}): {message}")]
    CoordinatorRejected { status: u16, message: String },

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reed_solomon_erasure::Error> for PeerVaultError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        PeerVaultError::Erasure(err.to_string())
    }
}

impl From<serde_json::Error> for PeerVaultError {
    fn from(err: serde_json::Error) -> Self {
        PeerVaultError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for PeerVaultError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let peer = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            PeerVaultError::Timeout { peer }
        } else {
            PeerVaultError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PeerVaultError::InsufficientShards {
            available: 5,
            required: 8,
        };
        assert_eq!(err.to_string(), "Insufficient shards: have 5, need 8");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PeerVaultError = io_err.into();
        assert!(matches!(err, PeerVaultError::Io(_)));
    }

    #[test]
    fn test_quota_error_display() {
        let err = PeerVaultError::QuotaExceeded {
            needed: 2048,
            quota: 1024,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }
}
