//! File manifests and wire schemas
//!
//! Typed records exchanged with the coordinator and between peers. Payload
//! structs reject unknown fields at the boundary.

use crate::crypto::{NONCE_SIZE, SALT_SIZE};
use crate::error::{PeerVaultError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness status of a peer as tracked by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Online,
    Offline,
    Suspect,
}

/// A storage peer as the coordinator advertises it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerRecord {
    pub peer_id: String,
    pub ip_address: String,
    pub port: u16,
    pub public_key: String,
    pub available_storage: u64,
    pub reputation: f64,
    pub status: PeerStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl PeerRecord {
    /// Base URL for this peer's HTTP service
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.ip_address, self.port)
    }
}

/// Per-file metadata registered with the coordinator.
///
/// Crypto fields are immutable once registered; only `shard_locations`
/// grows through later registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileManifest {
    /// Hex SHA-256 of the ciphertext, the file's primary address
    pub file_hash: String,
    pub original_name: String,
    /// Plaintext length in bytes
    pub total_size: u64,
    /// Ciphertext length in bytes
    pub encrypted_size: u64,
    pub shards_total: usize,
    pub shards_required: usize,
    /// Hex shard digests, position = shard index
    pub shard_hashes: Vec<String>,
    /// Shard index -> peer ids holding it; grows monotonically, not
    /// authoritative for liveness
    pub shard_locations: HashMap<usize, Vec<String>>,
    pub encryption_scheme: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileManifest {
    /// Check the structural invariants of a manifest.
    pub fn validate(&self) -> Result<()> {
        if self.shards_required == 0 || self.shards_required > self.shards_total {
            return Err(PeerVaultError::Serialization(format!(
                "invalid shard counts: required {} of {}",
                self.shards_required, self.shards_total
            )));
        }
        if self.shard_hashes.len() != self.shards_total {
            return Err(PeerVaultError::Serialization(format!(
                "expected {} shard hashes, got {}",
                self.shards_total,
                self.shard_hashes.len()
            )));
        }
        if let Some(index) = self
            .shard_locations
            .keys()
            .find(|i| **i >= self.shards_total)
        {
            return Err(PeerVaultError::Serialization(format!(
                "shard location index {} out of range (total {})",
                index, self.shards_total
            )));
        }
        Ok(())
    }

    /// Record that `peer_id` holds shard `index`, ignoring duplicates.
    pub fn add_location(&mut self, index: usize, peer_id: &str) {
        let peers = self.shard_locations.entry(index).or_default();
        if !peers.iter().any(|p| p == peer_id) {
            peers.push(peer_id.to_string());
        }
    }
}

/// Per-file encryption parameters the client must keep to decrypt.
///
/// Carried alongside the manifest but never sent to the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionHeader {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub scheme: String,
}

/// Result of a successful store: the file's address plus the header the
/// caller needs for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub file_hash: String,
    pub header: EncryptionHeader,
}

/// Proof-of-retrievability challenge issued by a verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditChallenge {
    pub file_hash: String,
    pub peer_id: String,
    /// At least 32 random bytes, hex-encoded
    pub nonce: String,
    pub timestamp: DateTime<Utc>,
}

/// Signed proof returned by the challenged peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofResponse {
    pub file_hash: String,
    /// Hex SHA-256(nonce || shard bytes)
    pub proof: String,
    /// Hex SHA-256 of the shard bytes
    pub merkle_root: String,
    pub timestamp: DateTime<Utc>,
    /// Base64 ECDSA signature over the proof string
    pub signature: String,
}

/// Sealed outcome of one audit exchange; append-only once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub file_hash: String,
    pub peer_id: String,
    pub nonce: String,
    pub proof: String,
    pub merkle_root: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub passed: bool,
}
