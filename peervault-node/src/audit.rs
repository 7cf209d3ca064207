//! Proof-of-retrievability auditing
//!
//! A verifier issues a nonce-bound challenge; the prover hashes the nonce
//! together with the shard bytes it holds and signs the result. The nonce
//! prevents replay, the signature binds the response to the challenged
//! peer, and the shard itself never leaves the prover.

use chrono::Utc;
use p256::ecdsa::SigningKey;
use parking_lot::Mutex;
use peervault_core::crypto::{self, sha256_hex};
use peervault_core::error::{PeerVaultError, Result};
use peervault_core::manifest::{AuditChallenge, AuditRecord, ProofResponse};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{info, warn};

/// Random bytes in a challenge nonce (hex doubles the length on the wire)
const NONCE_BYTES: usize = 32;

/// Aggregate audit outcomes
#[derive(Debug, Clone)]
pub struct AuditStats {
    pub total_audits: usize,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Issues challenges, produces proofs, verifies responses, and keeps the
/// append-only audit log.
pub struct AuditService {
    history: Mutex<Vec<AuditRecord>>,
    client: reqwest::Client,
}

impl AuditService {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Issue a challenge against `peer_id` for a shard of `file_hash`.
    pub fn create_challenge(&self, file_hash: &str, peer_id: &str) -> AuditChallenge {
        use rand::RngCore;
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        AuditChallenge {
            file_hash: file_hash.to_string(),
            peer_id: peer_id.to_string(),
            nonce: hex::encode(nonce),
            timestamp: Utc::now(),
        }
    }

    /// Prover side: answer a challenge over the shard bytes we hold.
    ///
    /// `proof = SHA-256(nonce || shard)`, with the nonce's UTF-8 hex text as
    /// the prefix; the signature covers the proof string.
    pub fn prove(
        &self,
        challenge: &AuditChallenge,
        shard_bytes: &[u8],
        signing_key: &SigningKey,
    ) -> ProofResponse {
        let mut hasher = Sha256::new();
        hasher.update(challenge.nonce.as_bytes());
        hasher.update(shard_bytes);
        let proof = hex::encode(hasher.finalize());

        let signature = crypto::sign(proof.as_bytes(), signing_key);

        ProofResponse {
            file_hash: challenge.file_hash.clone(),
            proof,
            merkle_root: sha256_hex(shard_bytes),
            timestamp: Utc::now(),
            signature,
        }
    }

    /// Verifier side: validate a proof against the prover's registered
    /// public key, looked up by peer id.
    ///
    /// With `known_shard` present the expected proof is recomputed and
    /// compared; without it, a structurally well-formed signed proof is
    /// accepted. The outcome is sealed into the audit log either way.
    pub fn verify(
        &self,
        challenge: &AuditChallenge,
        proof: &ProofResponse,
        prover_public_key_pem: &str,
        known_shard: Option<&[u8]>,
    ) -> bool {
        let passed = self.check_proof(challenge, proof, prover_public_key_pem, known_shard);

        self.record(AuditRecord {
            file_hash: challenge.file_hash.clone(),
            peer_id: challenge.peer_id.clone(),
            nonce: challenge.nonce.clone(),
            proof: proof.proof.clone(),
            merkle_root: proof.merkle_root.clone(),
            signature: proof.signature.clone(),
            timestamp: Utc::now(),
            passed,
        });

        if passed {
            info!(peer_id = %challenge.peer_id, file_hash = %challenge.file_hash, "Audit passed");
        } else {
            warn!(peer_id = %challenge.peer_id, file_hash = %challenge.file_hash, "Audit failed");
        }

        passed
    }

    fn check_proof(
        &self,
        challenge: &AuditChallenge,
        proof: &ProofResponse,
        prover_public_key_pem: &str,
        known_shard: Option<&[u8]>,
    ) -> bool {
        if proof.file_hash != challenge.file_hash {
            return false;
        }

        let Ok(public_key) = crypto::public_key_from_pem(prover_public_key_pem) else {
            warn!(peer_id = %challenge.peer_id, "Unparseable prover public key");
            return false;
        };
        if !crypto::verify(proof.proof.as_bytes(), &proof.signature, &public_key) {
            return false;
        }

        match known_shard {
            Some(shard) => {
                let mut hasher = Sha256::new();
                hasher.update(challenge.nonce.as_bytes());
                hasher.update(shard);
                let expected = hex::encode(hasher.finalize());
                proof.proof == expected
            }
            None => is_hex_digest(&proof.proof) && is_hex_digest(&proof.merkle_root),
        }
    }

    /// Send a challenge to a peer's audit endpoint and collect its proof.
    pub async fn challenge_peer(
        &self,
        peer_url: &str,
        challenge: &AuditChallenge,
    ) -> Result<ProofResponse> {
        let response = self
            .client
            .post(format!(
                "{}/audit/challenge",
                peer_url.trim_end_matches('/')
            ))
            .json(challenge)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PeerVaultError::Transport(format!(
                "audit challenge to {} rejected with {}",
                peer_url,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// Append a sealed record to the audit log
    pub fn record(&self, record: AuditRecord) {
        self.history.lock().push(record);
    }

    /// Snapshot of the audit log
    pub fn history(&self) -> Vec<AuditRecord> {
        self.history.lock().clone()
    }

    /// Aggregate pass/fail counts
    pub fn stats(&self) -> AuditStats {
        let history = self.history.lock();
        let total = history.len();
        let passed = history.iter().filter(|r| r.passed).count();

        AuditStats {
            total_audits: total,
            passed,
            failed: total - passed,
            success_rate: if total > 0 {
                passed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

impl Default for AuditService {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peervault_core::crypto::generate_keypair;

    #[test]
    fn test_challenge_nonce_shape() {
        let service = AuditService::new();
        let challenge = service.create_challenge("fh", "peer");

        assert_eq!(challenge.nonce.len(), 64);
        assert!(challenge.nonce.chars().all(|c| c.is_ascii_hexdigit()));

        let other = service.create_challenge("fh", "peer");
        assert_ne!(challenge.nonce, other.nonce);
    }

    #[test]
    fn test_prove_and_verify_with_known_shard() {
        let service = AuditService::new();
        let (signing_key, verifying_key) = generate_keypair();
        let public_pem = crypto::public_key_to_pem(&verifying_key).unwrap();

        let shard = b"shard contents under audit";
        let challenge = service.create_challenge("fh", "peer");
        let proof = service.prove(&challenge, shard, &signing_key);

        assert!(service.verify(&challenge, &proof, &public_pem, Some(shard)));
        assert_eq!(proof.merkle_root, sha256_hex(shard));
    }

    #[test]
    fn test_proof_matches_manual_hash() {
        let service = AuditService::new();
        let (signing_key, _) = generate_keypair();

        let nonce = "a".repeat(64);
        let shard = b"S";
        let challenge = AuditChallenge {
            file_hash: "fh".to_string(),
            peer_id: "peer".to_string(),
            nonce: nonce.clone(),
            timestamp: Utc::now(),
        };

        let proof = service.prove(&challenge, shard, &signing_key);

        let mut expected = nonce.into_bytes();
        expected.extend_from_slice(shard);
        assert_eq!(proof.proof, sha256_hex(&expected));
    }

    #[test]
    fn test_verify_fails_on_mutated_shard() {
        let service = AuditService::new();
        let (signing_key, verifying_key) = generate_keypair();
        let public_pem = crypto::public_key_to_pem(&verifying_key).unwrap();

        let challenge = service.create_challenge("fh", "peer");
        let proof = service.prove(&challenge, b"original shard", &signing_key);

        // Prover's shard was altered by one bit
        assert!(!service.verify(&challenge, &proof, &public_pem, Some(b"original shbrd")));
    }

    #[test]
    fn test_verify_fails_on_wrong_signer() {
        let service = AuditService::new();
        let (signing_key, _) = generate_keypair();
        let (_, other_verifying) = generate_keypair();
        let other_pem = crypto::public_key_to_pem(&other_verifying).unwrap();

        let shard = b"shard";
        let challenge = service.create_challenge("fh", "peer");
        let proof = service.prove(&challenge, shard, &signing_key);

        assert!(!service.verify(&challenge, &proof, &other_pem, Some(shard)));
    }

    #[test]
    fn test_verify_without_bytes_accepts_well_formed() {
        let service = AuditService::new();
        let (signing_key, verifying_key) = generate_keypair();
        let public_pem = crypto::public_key_to_pem(&verifying_key).unwrap();

        let challenge = service.create_challenge("fh", "peer");
        let proof = service.prove(&challenge, b"unknown to verifier", &signing_key);

        assert!(service.verify(&challenge, &proof, &public_pem, None));
    }

    #[test]
    fn test_history_and_stats() {
        let service = AuditService::new();
        let (signing_key, verifying_key) = generate_keypair();
        let public_pem = crypto::public_key_to_pem(&verifying_key).unwrap();

        let shard = b"shard";
        let challenge = service.create_challenge("fh", "peer");
        let proof = service.prove(&challenge, shard, &signing_key);

        service.verify(&challenge, &proof, &public_pem, Some(shard));
        service.verify(&challenge, &proof, &public_pem, Some(b"wrong"));

        let stats = service.stats();
        assert_eq!(stats.total_audits, 2);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);

        let history = service.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].passed);
        assert!(!history[1].passed);
    }
}
