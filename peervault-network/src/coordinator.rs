//! Coordinator HTTP client
//!
//! Typed wrapper over the coordinator's REST endpoints. Every payload is an
//! explicit struct; non-success statuses surface as
//! [`PeerVaultError::CoordinatorRejected`] with the response body.

use peervault_core::error::{PeerVaultError, Result};
use peervault_core::manifest::{AuditChallenge, FileManifest, PeerRecord, ProofResponse};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for coordinator calls
const COORDINATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Acknowledgement of a peer registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub peer_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Acknowledgement of a file registration
#[derive(Debug, Clone, Deserialize)]
pub struct FileRegisterResponse {
    pub status: String,
    pub file_hash: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Shard placement for a file as the coordinator knows it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLocations {
    pub file_hash: String,
    pub shard_locations: HashMap<usize, Vec<String>>,
    pub shards_required: usize,
    pub shards_total: usize,
    /// Expected shard digests by index; empty when the coordinator predates
    /// hash reporting, in which case downloads are verified locally only
    #[serde(default)]
    pub shard_hashes: Vec<String>,
}

/// Outcome of an audit proof verification
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// HTTP client for the coordinator service
pub struct CoordinatorClient {
    base_url: String,
    client: Client,
}

impl CoordinatorClient {
    /// Create a client for the coordinator at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            client: Client::builder()
                .timeout(COORDINATOR_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Coordinator base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register or refresh this peer. The coordinator upserts on `peer_id`,
    /// transitions the status to online, and refreshes `last_seen`.
    pub async fn register_peer(&self, peer: &PeerRecord) -> Result<RegisterResponse> {
        let response = self
            .client
            .post(format!("{}/register", self.base_url))
            .json(peer)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let ack: RegisterResponse = response.json().await?;
        debug!(peer_id = %ack.peer_id, "Registered with coordinator");
        Ok(ack)
    }

    /// Register file metadata. Idempotent on `file_hash`; repeated calls
    /// only merge additional `shard_locations`.
    pub async fn register_file(&self, manifest: &FileManifest) -> Result<FileRegisterResponse> {
        manifest.validate()?;

        let response = self
            .client
            .post(format!("{}/file/register", self.base_url))
            .json(manifest)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let ack: FileRegisterResponse = response.json().await?;
        info!(file_hash = %ack.file_hash, "File manifest registered");
        Ok(ack)
    }

    /// Fetch shard placement for a file; 404 surfaces as
    /// `CoordinatorRejected { status: 404, .. }`.
    pub async fn file_locations(&self, file_hash: &str) -> Result<FileLocations> {
        let response = self
            .client
            .get(format!("{}/file/{}/locations", self.base_url, file_hash))
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// List online peers above a reputation floor.
    pub async fn list_peers(&self, min_reputation: f64, limit: usize) -> Result<Vec<PeerRecord>> {
        let response = self
            .client
            .get(format!("{}/peers", self.base_url))
            .query(&[
                ("min_reputation", min_reputation.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Mark a peer offline.
    pub async fn deregister_peer(&self, peer_id: &str, reason: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/peer/{}", self.base_url, peer_id))
            .query(&[("reason", reason)])
            .send()
            .await?;

        Self::check(response).await?;
        info!(peer_id, reason, "Deregistered from coordinator");
        Ok(())
    }

    /// Record a challenge with the coordinator before issuing it to a peer.
    pub async fn submit_challenge(&self, challenge: &AuditChallenge) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/audit/challenge", self.base_url))
            .json(challenge)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Submit a proof for coordinator-side verification and logging.
    pub async fn verify_proof(&self, proof: &ProofResponse) -> Result<VerifyOutcome> {
        let response = self
            .client
            .post(format!("{}/audit/verify", self.base_url))
            .json(proof)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PeerVaultError::CoordinatorRejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = CoordinatorClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_file_locations_deserialization() {
        let json = r#"{
            "file_hash": "abc",
            "shard_locations": {"0": ["peer-a"], "1": ["peer-a", "peer-b"]},
            "shards_required": 2,
            "shards_total": 4
        }"#;
        let locations: FileLocations = serde_json::from_str(json).unwrap();
        assert_eq!(locations.shard_locations[&1], vec!["peer-a", "peer-b"]);
        assert_eq!(locations.shards_required, 2);
    }
}
