//! Node identity
//!
//! Each node owns a persistent ECDSA P-256 keypair. The peer id is derived
//! from the public key, so it is deterministic and stable across restarts.
//! The private key never leaves the node.

use p256::ecdsa::{SigningKey, VerifyingKey};
use peervault_core::crypto;
use peervault_core::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

const IDENTITY_FILE: &str = "identity.json";

/// Persistent node identity: peer id plus PEM-encoded keypair
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub peer_id: String,
    /// SPKI PEM
    pub public_key: String,
    /// PKCS#8 PEM; never serialized onto the wire
    pub private_key: String,
}

impl NodeIdentity {
    /// Load the identity from `data_dir`, generating and persisting a fresh
    /// one on first start.
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(IDENTITY_FILE);

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let identity: NodeIdentity = serde_json::from_str(&content)?;
            info!(peer_id = %identity.peer_id, "Loaded existing identity");
            return Ok(identity);
        }

        let (signing_key, verifying_key) = crypto::generate_keypair();
        let private_key = crypto::private_key_to_pem(&signing_key)?;
        let public_key = crypto::public_key_to_pem(&verifying_key)?;
        let peer_id = crypto::derive_peer_id(&public_key);

        let identity = Self {
            peer_id,
            public_key,
            private_key,
        };

        fs::create_dir_all(data_dir)?;
        fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
        info!(peer_id = %identity.peer_id, "Generated new identity");

        Ok(identity)
    }

    /// Parse the private key for signing
    pub fn signing_key(&self) -> Result<SigningKey> {
        crypto::private_key_from_pem(&self.private_key)
    }

    /// Parse the public key for verification
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        crypto::public_key_from_pem(&self.public_key)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}
