//! Peer discovery and placement
//!
//! Maintains a cached membership view refreshed from the coordinator and
//! picks storage targets for shard dispersion. Cache entries older than
//! five minutes are treated as stale; the coordinator's peer list is the
//! authoritative source.

use crate::coordinator::CoordinatorClient;
use parking_lot::RwLock;
use peervault_core::error::Result;
use peervault_core::manifest::{PeerRecord, PeerStatus};
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cache entries older than this are stale on lookup
const PEER_CACHE_TTL: Duration = Duration::from_secs(300);

/// Timeout for peer health probes
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// How a set of candidate peers is ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Highest reputation first
    Reputation,
    /// Most available storage first
    Storage,
    /// Uniform random sample
    Random,
}

#[derive(Clone)]
struct CachedPeer {
    record: PeerRecord,
    discovered_at: Instant,
}

/// Membership view and placement policy
pub struct DiscoveryService {
    coordinator: Arc<CoordinatorClient>,
    min_reputation: f64,
    peers: RwLock<HashMap<String, CachedPeer>>,
    last_discovery: RwLock<Option<Instant>>,
    health_client: reqwest::Client,
}

impl DiscoveryService {
    /// Create a discovery service with a reputation floor for peer
    /// selection.
    pub fn new(coordinator: Arc<CoordinatorClient>, min_reputation: f64) -> Self {
        Self {
            coordinator,
            min_reputation,
            peers: RwLock::new(HashMap::new()),
            last_discovery: RwLock::new(None),
            health_client: reqwest::Client::builder()
                .timeout(HEALTH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Refresh the membership view from the coordinator and return the
    /// filtered peer list.
    pub async fn discover(&self, min_reputation: Option<f64>) -> Result<Vec<PeerRecord>> {
        let min_rep = min_reputation.unwrap_or(self.min_reputation);
        let peers = self.coordinator.list_peers(min_rep, 100).await?;

        self.cache_peers(&peers);
        *self.last_discovery.write() = Some(Instant::now());

        info!(count = peers.len(), "Discovered peers");
        Ok(peers)
    }

    /// Find up to `count` peers suitable for storing shards.
    ///
    /// Candidates are online, not excluded, and ranked by reputation then
    /// available storage. When more than `count` qualify, the result is a
    /// uniform sample from the top `2 * count`, biasing toward well-ranked
    /// peers while spreading load. Fewer than `count` available peers are
    /// returned as-is; the caller decides what a shortfall means.
    pub async fn find_storage_peers(
        &self,
        count: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<PeerRecord>> {
        let all_peers = self.discover(None).await?;

        let mut candidates: Vec<PeerRecord> = all_peers
            .into_iter()
            .filter(|p| p.status == PeerStatus::Online && !exclude.contains(&p.peer_id))
            .collect();

        if candidates.len() < count {
            warn!(
                available = candidates.len(),
                needed = count,
                "Fewer storage peers available than requested"
            );
        }

        candidates.sort_by(|a, b| {
            b.reputation
                .partial_cmp(&a.reputation)
                .unwrap_or(Ordering::Equal)
                .then(b.available_storage.cmp(&a.available_storage))
        });

        let selected = if candidates.len() <= count {
            candidates
        } else {
            let pool_size = (count * 2).min(candidates.len());
            let mut rng = rand::thread_rng();
            candidates[..pool_size]
                .choose_multiple(&mut rng, count)
                .cloned()
                .collect()
        };

        debug!(selected = selected.len(), "Selected storage peers");
        Ok(selected)
    }

    /// Peer ids the coordinator believes hold a given shard, order
    /// preserved.
    pub async fn find_shard_hosts(
        &self,
        file_hash: &str,
        shard_index: usize,
    ) -> Result<Vec<String>> {
        let locations = self.coordinator.file_locations(file_hash).await?;
        Ok(locations
            .shard_locations
            .get(&shard_index)
            .cloned()
            .unwrap_or_default())
    }

    /// Probe a peer's `/health` endpoint. Timeout or non-200 is unhealthy.
    pub async fn health_check(&self, peer_url: &str) -> bool {
        match self
            .health_client
            .get(format!("{}/health", peer_url.trim_end_matches('/')))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(peer_url, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Rank `peers` by `strategy` and return the first `count`.
    pub fn select_peers(
        peers: &[PeerRecord],
        count: usize,
        strategy: SelectionStrategy,
    ) -> Vec<PeerRecord> {
        if peers.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<PeerRecord> = peers.to_vec();
        match strategy {
            SelectionStrategy::Reputation => sorted.sort_by(|a, b| {
                b.reputation
                    .partial_cmp(&a.reputation)
                    .unwrap_or(Ordering::Equal)
            }),
            SelectionStrategy::Storage => {
                sorted.sort_by(|a, b| b.available_storage.cmp(&a.available_storage))
            }
            SelectionStrategy::Random => {
                let mut rng = rand::thread_rng();
                return sorted
                    .choose_multiple(&mut rng, count.min(peers.len()))
                    .cloned()
                    .collect();
            }
        }

        sorted.truncate(count);
        sorted
    }

    /// Look up one peer, served from cache while fresh.
    pub async fn peer_info(&self, peer_id: &str) -> Result<Option<PeerRecord>> {
        if let Some(cached) = self.cached_peer(peer_id) {
            return Ok(Some(cached));
        }

        let peers = self.coordinator.list_peers(0.0, 1000).await?;
        self.cache_peers(&peers);

        Ok(peers.into_iter().find(|p| p.peer_id == peer_id))
    }

    /// Online peers from the cache that are still fresh, optionally above a
    /// reputation floor.
    pub fn cached_peers(&self, min_reputation: Option<f64>) -> Vec<PeerRecord> {
        let min_rep = min_reputation.unwrap_or(self.min_reputation);
        let peers = self.peers.read();
        peers
            .values()
            .filter(|c| {
                c.discovered_at.elapsed() < PEER_CACHE_TTL
                    && c.record.status == PeerStatus::Online
                    && c.record.reputation >= min_rep
            })
            .map(|c| c.record.clone())
            .collect()
    }

    /// Instant of the last successful coordinator refresh
    pub fn last_discovery(&self) -> Option<Instant> {
        *self.last_discovery.read()
    }

    fn cached_peer(&self, peer_id: &str) -> Option<PeerRecord> {
        let peers = self.peers.read();
        peers
            .get(peer_id)
            .filter(|c| c.discovered_at.elapsed() < PEER_CACHE_TTL)
            .map(|c| c.record.clone())
    }

    fn cache_peers(&self, records: &[PeerRecord]) {
        let now = Instant::now();
        let mut peers = self.peers.write();
        for record in records {
            peers.insert(
                record.peer_id.clone(),
                CachedPeer {
                    record: record.clone(),
                    discovered_at: now,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn peer(id: &str, reputation: f64, storage: u64) -> PeerRecord {
        PeerRecord {
            peer_id: id.to_string(),
            ip_address: "127.0.0.1".to_string(),
            port: 9000,
            public_key: String::new(),
            available_storage: storage,
            reputation,
            status: PeerStatus::Online,
            last_seen: Utc::now(),
            capabilities: vec!["storage".to_string()],
        }
    }

    fn service() -> DiscoveryService {
        let coordinator = Arc::new(CoordinatorClient::new("http://localhost:8000"));
        DiscoveryService::new(coordinator, 0.5)
    }

    #[test]
    fn test_select_by_reputation() {
        let peers = vec![peer("a", 0.3, 50), peer("b", 0.9, 10), peer("c", 0.7, 99)];
        let selected = DiscoveryService::select_peers(&peers, 2, SelectionStrategy::Reputation);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].peer_id, "b");
        assert_eq!(selected[1].peer_id, "c");
    }

    #[test]
    fn test_select_by_storage() {
        let peers = vec![peer("a", 0.3, 50), peer("b", 0.9, 10), peer("c", 0.7, 99)];
        let selected = DiscoveryService::select_peers(&peers, 1, SelectionStrategy::Storage);

        assert_eq!(selected[0].peer_id, "c");
    }

    #[test]
    fn test_select_random_bounds() {
        let peers = vec![peer("a", 0.3, 50), peer("b", 0.9, 10), peer("c", 0.7, 99)];
        let selected = DiscoveryService::select_peers(&peers, 2, SelectionStrategy::Random);
        assert_eq!(selected.len(), 2);

        let over = DiscoveryService::select_peers(&peers, 10, SelectionStrategy::Random);
        assert_eq!(over.len(), 3);

        let none = DiscoveryService::select_peers(&[], 3, SelectionStrategy::Random);
        assert!(none.is_empty());
    }

    #[test]
    fn test_cache_and_freshness() {
        let svc = service();
        svc.cache_peers(&[peer("a", 0.9, 100), peer("b", 0.2, 100)]);

        // Reputation floor (0.5) filters b
        let cached = svc.cached_peers(None);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].peer_id, "a");

        // Explicit floor of zero returns both
        assert_eq!(svc.cached_peers(Some(0.0)).len(), 2);

        // Direct lookup hits the cache regardless of floor
        assert!(svc.cached_peer("b").is_some());
        assert!(svc.cached_peer("missing").is_none());
    }

    #[test]
    fn test_cache_filters_offline() {
        let svc = service();
        let mut offline = peer("down", 0.9, 100);
        offline.status = PeerStatus::Offline;
        svc.cache_peers(&[offline]);

        assert!(svc.cached_peers(Some(0.0)).is_empty());
    }

    #[test]
    fn test_cache_replaces_entries() {
        let svc = service();
        svc.cache_peers(&[peer("a", 0.6, 100)]);
        svc.cache_peers(&[peer("a", 0.8, 200)]);

        let cached = svc.cached_peers(Some(0.0));
        assert_eq!(cached.len(), 1);
        assert!((cached[0].reputation - 0.8).abs() < f64::EPSILON);
    }
}
