//! PeerVault Core Library
//!
//! Core abstractions for the PeerVault encrypted P2P storage network.
//! This crate provides:
//! - Password-based authenticated encryption (PBKDF2 + AES-256-GCM)
//! - Systematic Reed-Solomon erasure coding
//! - ECDSA P-256 peer identities and proof signatures
//! - File manifests and wire schemas
//! - Common error handling

pub mod crypto;
pub mod erasure;
pub mod error;
pub mod manifest;

pub use crypto::{decrypt, encrypt, sha256_hex, ContentHash, EncryptedData, EncryptionKey};
pub use erasure::ErasureCodec;
pub use error::{PeerVaultError, Result};
pub use manifest::{
    AuditChallenge, AuditRecord, EncryptionHeader, FileManifest, PeerRecord, PeerStatus,
    ProofResponse, StoreReceipt,
};

/// Default erasure coding configuration
/// - 8 shards required: minimum to reconstruct
/// - 20 shards total: tolerates loss of any 12
pub const SHARDS_REQUIRED: usize = 8;
pub const SHARDS_TOTAL: usize = 20;

/// Label of the authenticated cipher used for file encryption
pub const ENCRYPTION_SCHEME: &str = "AES-256-GCM";
