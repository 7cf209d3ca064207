//! Blocking façade over the async node API
//!
//! For synchronous callers (scripts, tests, embedding hosts) that don't run
//! their own tokio runtime. The client owns a runtime and blocks the
//! calling thread only; it must not be used from inside an async context.

use crate::config::NodeConfig;
use crate::node::Node;
use peervault_core::error::{PeerVaultError, Result};
use peervault_core::manifest::{EncryptionHeader, PeerRecord, StoreReceipt};
use std::path::Path;
use std::sync::Arc;

/// Synchronous wrapper around [`Node`]
pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    node: Arc<Node>,
}

impl BlockingClient {
    /// Build a node from `config` with a dedicated runtime.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| PeerVaultError::Configuration(e.to_string()))?;
        let node = Arc::new(Node::new(config)?);
        Ok(Self { runtime, node })
    }

    /// The wrapped node
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Register this node with the coordinator
    pub fn register(&self) -> Result<()> {
        self.runtime.block_on(self.node.register())
    }

    /// Store a byte buffer; see [`Node::store_bytes`]
    pub fn store_bytes(
        &self,
        data: &[u8],
        original_name: &str,
        password: &str,
    ) -> Result<StoreReceipt> {
        self.runtime
            .block_on(self.node.store_bytes(data, original_name, password))
    }

    /// Store a file from disk; see [`Node::store_file`]
    pub fn store_file(&self, path: &Path, password: &str) -> Result<StoreReceipt> {
        self.runtime.block_on(self.node.store_file(path, password))
    }

    /// Retrieve a file; see [`Node::retrieve`]
    pub fn retrieve(
        &self,
        file_hash: &str,
        password: &str,
        header: &EncryptionHeader,
    ) -> Result<Vec<u8>> {
        self.runtime
            .block_on(self.node.retrieve(file_hash, password, header))
    }

    /// List peers known to the coordinator
    pub fn list_peers(&self, min_reputation: f64) -> Result<Vec<PeerRecord>> {
        self.runtime
            .block_on(self.node.discovery().discover(Some(min_reputation)))
    }
}
