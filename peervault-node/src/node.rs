//! Node pipeline
//!
//! Owns the node identity and composes crypto, erasure coding, the shard
//! store, discovery, and transfer into the store, retrieve, and audit
//! flows. Background tasks keep the node registered, the peer cache fresh,
//! and stored shards audited.

use crate::audit::AuditService;
use crate::config::NodeConfig;
use crate::identity::NodeIdentity;
use bytes::Bytes;
use chrono::Utc;
use p256::ecdsa::SigningKey;
use peervault_core::crypto::{decrypt, encrypt, sha256_hex, EncryptedData, EncryptionKey};
use peervault_core::erasure::ErasureCodec;
use peervault_core::error::{PeerVaultError, Result};
use peervault_core::manifest::{
    AuditRecord, EncryptionHeader, FileManifest, PeerRecord, PeerStatus, StoreReceipt,
};
use peervault_core::ENCRYPTION_SCHEME;
use peervault_network::{CoordinatorClient, DiscoveryService, TransferService};
use peervault_storage::{ShardStore, StorageConfig};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinator re-registration period
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Reputation floor for storage peer selection
const MIN_REPUTATION: f64 = 0.5;

/// A running PeerVault storage node
pub struct Node {
    config: NodeConfig,
    identity: NodeIdentity,
    signing_key: SigningKey,
    store: Arc<ShardStore>,
    coordinator: Arc<CoordinatorClient>,
    discovery: Arc<DiscoveryService>,
    transfer: Arc<TransferService>,
    audit: Arc<AuditService>,
}

impl Node {
    /// Create a node from validated configuration: loads or creates the
    /// identity and opens the shard store under `data_dir`.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let identity = NodeIdentity::load_or_create(&config.node.data_dir)?;
        let signing_key = identity.signing_key()?;

        let storage_config = StorageConfig::new(&config.node.data_dir)
            .with_quota_bytes(config.node.quota_bytes());
        let store = Arc::new(ShardStore::open(&storage_config)?);

        let coordinator = Arc::new(CoordinatorClient::new(&config.coordinator.url));
        let discovery = Arc::new(DiscoveryService::new(coordinator.clone(), MIN_REPUTATION));
        let transfer = Arc::new(TransferService::default());
        let audit = Arc::new(AuditService::new());

        info!(
            peer_id = %identity.peer_id,
            port = config.node.port,
            coordinator = %config.coordinator.url,
            "Node initialized"
        );

        Ok(Self {
            config,
            identity,
            signing_key,
            store,
            coordinator,
            discovery,
            transfer,
            audit,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    pub fn transfer(&self) -> &TransferService {
        &self.transfer
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// This node as the coordinator should see it
    pub fn peer_record(&self) -> PeerRecord {
        let available_storage = self
            .store
            .stats()
            .map(|s| s.available_bytes)
            .unwrap_or(0);

        PeerRecord {
            peer_id: self.identity.peer_id.clone(),
            ip_address: self.advertised_ip(),
            port: self.config.node.port,
            public_key: self.identity.public_key.clone(),
            available_storage,
            reputation: 1.0,
            status: PeerStatus::Online,
            last_seen: Utc::now(),
            capabilities: vec![
                "storage".to_string(),
                "retrieval".to_string(),
                "audit".to_string(),
            ],
        }
    }

    /// Register (or refresh) this node with the coordinator
    pub async fn register(&self) -> Result<()> {
        self.coordinator.register_peer(&self.peer_record()).await?;
        Ok(())
    }

    /// Mark this node offline at the coordinator
    pub async fn deregister(&self, reason: &str) -> Result<()> {
        self.coordinator
            .deregister_peer(&self.identity.peer_id, reason)
            .await
    }

    // =====================================================================
    // Store pipeline
    // =====================================================================

    /// Encrypt, shard, persist, and disperse a byte buffer.
    ///
    /// Every shard lands in the local store before any remote placement is
    /// attempted, and the manifest is published only afterwards. Dispersion
    /// beyond `self` is best-effort: a redundancy shortfall is logged, never
    /// fatal.
    pub async fn store_bytes(
        &self,
        data: &[u8],
        original_name: &str,
        password: &str,
    ) -> Result<StoreReceipt> {
        let settings = &self.config.node;
        let codec = ErasureCodec::new(settings.shards_required, settings.shards_total)?;

        let (key, salt) = EncryptionKey::derive_from_password(password, None);
        let encrypted = encrypt(data, &key)?;
        let ciphertext = encrypted.ciphertext;
        let file_hash = sha256_hex(&ciphertext);

        let shards = codec.encode(&ciphertext)?;
        let shard_hashes: Vec<String> = shards.iter().map(|s| sha256_hex(s)).collect();

        let mut manifest = FileManifest {
            file_hash: file_hash.clone(),
            original_name: original_name.to_string(),
            total_size: data.len() as u64,
            encrypted_size: ciphertext.len() as u64,
            shards_total: shards.len(),
            shards_required: settings.shards_required,
            shard_hashes: shard_hashes.clone(),
            shard_locations: HashMap::new(),
            encryption_scheme: ENCRYPTION_SCHEME.to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };

        // Durable local placement precedes any remote advertisement
        for (index, shard) in shards.iter().enumerate() {
            self.store
                .put(&file_hash, index, shard, Some(&self.identity.peer_id), None)?;
            manifest.add_location(index, &self.identity.peer_id);
        }

        self.disperse(&mut manifest, &shards, &shard_hashes).await;

        self.store.record_file(&manifest)?;
        self.coordinator.register_file(&manifest).await?;

        info!(
            file_hash = %file_hash,
            shards = shards.len(),
            size = data.len(),
            "File stored"
        );

        Ok(StoreReceipt {
            file_hash,
            header: EncryptionHeader {
                salt,
                nonce: encrypted.nonce,
                scheme: ENCRYPTION_SCHEME.to_string(),
            },
        })
    }

    /// Read a file from disk and store it under its basename
    pub async fn store_file(&self, path: &Path, password: &str) -> Result<StoreReceipt> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        self.store_bytes(&data, &name, password).await
    }

    /// Place every shard on up to `redundancy_factor - 1` remote peers
    async fn disperse(
        &self,
        manifest: &mut FileManifest,
        shards: &[Bytes],
        shard_hashes: &[String],
    ) {
        let replicas = self.config.node.redundancy_factor.saturating_sub(1);
        if replicas == 0 {
            return;
        }

        let mut exclude = HashSet::new();
        exclude.insert(self.identity.peer_id.clone());

        let peers = match self.discovery.find_storage_peers(replicas, &exclude).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "Peer discovery failed, keeping shards local only");
                return;
            }
        };
        if peers.is_empty() {
            warn!("No remote peers available for dispersion");
            return;
        }

        let all_indices: Vec<usize> = (0..shards.len()).collect();
        let mut plan: HashMap<String, Vec<usize>> = HashMap::new();
        let mut peer_ids: HashMap<String, String> = HashMap::new();
        for peer in &peers {
            plan.insert(peer.url(), all_indices.clone());
            peer_ids.insert(peer.url(), peer.peer_id.clone());
        }

        let placed = self
            .transfer
            .batch_upload(&plan, &manifest.file_hash, shards, shard_hashes)
            .await;

        for (shard_index, urls) in placed {
            for url in urls {
                if let Some(peer_id) = peer_ids.get(&url) {
                    manifest.add_location(shard_index, peer_id);
                }
            }
        }

        for index in 0..shards.len() {
            let copies = manifest
                .shard_locations
                .get(&index)
                .map(|p| p.len())
                .unwrap_or(0);
            if copies < self.config.node.redundancy_factor {
                debug!(
                    shard_index = index,
                    copies,
                    target = self.config.node.redundancy_factor,
                    "Redundancy target not met"
                );
            }
        }
    }

    // =====================================================================
    // Retrieve pipeline
    // =====================================================================

    /// Collect enough shards to reconstruct the ciphertext, then decrypt.
    ///
    /// Decode runs only once at least `shards_required` verified shards are
    /// in hand; a shortfall fails with `InsufficientShards` before any
    /// decryption is attempted.
    pub async fn retrieve(
        &self,
        file_hash: &str,
        password: &str,
        header: &EncryptionHeader,
    ) -> Result<Vec<u8>> {
        let locations = self.coordinator.file_locations(file_hash).await?;
        let required = locations.shards_required;
        let codec = ErasureCodec::new(locations.shards_required, locations.shards_total)?;

        let mut collected: HashMap<usize, Bytes> = HashMap::new();
        let mut remote: HashMap<usize, Vec<String>> = HashMap::new();

        for (&shard_index, peer_ids) in &locations.shard_locations {
            let mut urls = Vec::new();
            for peer_id in peer_ids {
                if *peer_id == self.identity.peer_id {
                    match self.store.get(file_hash, shard_index) {
                        Ok(bytes) => {
                            collected.insert(shard_index, Bytes::from(bytes));
                            break;
                        }
                        Err(e) => {
                            warn!(shard_index, error = %e, "Local shard unusable, trying peers");
                        }
                    }
                } else {
                    match self.discovery.peer_info(peer_id).await {
                        Ok(Some(peer)) => urls.push(peer.url()),
                        Ok(None) => debug!(peer_id, "Peer in shard locations is unknown"),
                        Err(e) => debug!(peer_id, error = %e, "Peer lookup failed"),
                    }
                }
            }
            if !collected.contains_key(&shard_index) && !urls.is_empty() {
                remote.insert(shard_index, urls);
            }
        }

        if collected.len() < required && !remote.is_empty() {
            let downloaded = self
                .transfer
                .batch_download(&remote, file_hash, &locations.shard_hashes, required)
                .await;
            collected.extend(downloaded);
        }

        if collected.len() < required {
            return Err(PeerVaultError::InsufficientShards {
                available: collected.len(),
                required,
            });
        }

        let shards: Vec<(usize, Bytes)> = collected.into_iter().collect();
        let ciphertext = codec.decode(&shards)?;

        let (key, _) = EncryptionKey::derive_from_password(password, Some(header.salt));
        let plaintext = decrypt(
            &EncryptedData {
                nonce: header.nonce,
                ciphertext,
            },
            &key,
        )?;

        info!(file_hash, size = plaintext.len(), "File retrieved");
        Ok(plaintext)
    }

    // =====================================================================
    // Audit pipeline
    // =====================================================================

    /// Challenge a peer to prove it still holds a shard of `file_hash`.
    ///
    /// The prover's public key is looked up by peer id. When the shard the
    /// prover attests (identified through its digest) is also held locally,
    /// the expected proof is recomputed; otherwise a well-formed signed
    /// proof is accepted.
    pub async fn audit_peer(&self, file_hash: &str, peer_id: &str) -> Result<bool> {
        let peer = self
            .discovery
            .peer_info(peer_id)
            .await?
            .ok_or_else(|| PeerVaultError::Transport(format!("unknown peer {}", peer_id)))?;

        let challenge = self.audit.create_challenge(file_hash, peer_id);
        if let Err(e) = self.coordinator.submit_challenge(&challenge).await {
            debug!(error = %e, "Coordinator challenge registration failed");
        }

        let proof = self.audit.challenge_peer(&peer.url(), &challenge).await?;

        let locations = self.coordinator.file_locations(file_hash).await.ok();
        let known_shard: Option<Vec<u8>> = match &locations {
            Some(loc) if !loc.shard_hashes.is_empty() => {
                match loc.shard_hashes.iter().position(|h| *h == proof.merkle_root) {
                    Some(index) => self.store.get(file_hash, index).ok(),
                    None => {
                        // The attested bytes belong to no shard of this file
                        warn!(peer_id, file_hash, "Proof digest matches no known shard");
                        self.audit.record(AuditRecord {
                            file_hash: challenge.file_hash.clone(),
                            peer_id: challenge.peer_id.clone(),
                            nonce: challenge.nonce.clone(),
                            proof: proof.proof.clone(),
                            merkle_root: proof.merkle_root.clone(),
                            signature: proof.signature.clone(),
                            timestamp: Utc::now(),
                            passed: false,
                        });
                        return Ok(false);
                    }
                }
            }
            _ => None,
        };

        let passed = self
            .audit
            .verify(&challenge, &proof, &peer.public_key, known_shard.as_deref());

        if let Err(e) = self.coordinator.verify_proof(&proof).await {
            debug!(error = %e, "Coordinator proof logging failed");
        }

        Ok(passed)
    }

    // =====================================================================
    // Background tasks
    // =====================================================================

    /// Spawn the heartbeat, discovery, and audit loops for the life of the
    /// node. Each tick tolerates failures by logging and continuing.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move { node.heartbeat_loop().await });

        let node = self.clone();
        tokio::spawn(async move { node.discovery_loop().await });

        let node = self.clone();
        tokio::spawn(async move { node.audit_loop().await });
    }

    async fn heartbeat_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = self.register().await {
                warn!(error = %e, "Heartbeat registration failed");
            }
        }
    }

    async fn discovery_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.node.peer_discovery_interval_secs,
        ));
        loop {
            interval.tick().await;
            if let Err(e) = self.discovery.discover(None).await {
                warn!(error = %e, "Peer discovery tick failed");
            }
        }
    }

    async fn audit_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.node.audit_interval_secs));
        loop {
            interval.tick().await;

            match self.store.gc() {
                Ok(removed) if removed > 0 => debug!(removed, "Expired shards collected"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Garbage collection failed"),
            }

            if let Err(e) = self.audit_sweep().await {
                warn!(error = %e, "Audit sweep failed");
            }
        }
    }

    /// Challenge one random remote holder of one of our files
    async fn audit_sweep(&self) -> Result<()> {
        let files = self.store.list_files()?;
        let Some(file_hash) = files.choose(&mut rand::thread_rng()).cloned() else {
            return Ok(());
        };

        let locations = self.coordinator.file_locations(&file_hash).await?;
        let mut holders: Vec<String> = locations
            .shard_locations
            .values()
            .flatten()
            .filter(|p| **p != self.identity.peer_id)
            .cloned()
            .collect();
        holders.sort();
        holders.dedup();

        let Some(peer_id) = holders.choose(&mut rand::thread_rng()).cloned() else {
            return Ok(());
        };

        let passed = self.audit_peer(&file_hash, &peer_id).await?;
        info!(file_hash = %file_hash, peer_id = %peer_id, passed, "Audit sweep completed");
        Ok(())
    }

    fn advertised_ip(&self) -> String {
        if let Some(ref addr) = self.config.node.public_address {
            return addr.clone();
        }
        local_ip().unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

/// Best-effort local IP discovery via a non-transmitting UDP socket
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.node.public_address = Some("127.0.0.1".to_string());
        config.node.shards_required = 2;
        config.node.shards_total = 4;
        config
    }

    #[test]
    fn test_node_construction_persists_identity() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(test_config(&dir)).unwrap();
        let peer_id = node.identity().peer_id.clone();
        drop(node);

        let node = Node::new(test_config(&dir)).unwrap();
        assert_eq!(node.identity().peer_id, peer_id);
    }

    #[test]
    fn test_peer_record_shape() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(test_config(&dir)).unwrap();
        let record = node.peer_record();

        assert_eq!(record.peer_id, node.identity().peer_id);
        assert_eq!(record.ip_address, "127.0.0.1");
        assert_eq!(record.status, PeerStatus::Online);
        assert!(record.capabilities.contains(&"storage".to_string()));
        assert!(record.available_storage > 0);
    }
}
