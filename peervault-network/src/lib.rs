//! PeerVault Network Layer
//!
//! Provides:
//! - `CoordinatorClient` for the coordinator's REST endpoints
//! - `DiscoveryService` for membership and shard placement
//! - `TransferService` for peer-to-peer shard upload/download

pub mod coordinator;
pub mod discovery;
pub mod transfer;

pub use coordinator::{CoordinatorClient, FileLocations, RegisterResponse, VerifyOutcome};
pub use discovery::{DiscoveryService, SelectionStrategy};
pub use transfer::{TransferConfig, TransferService, TransferStats};
