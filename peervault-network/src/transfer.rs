//! Peer-to-peer shard transfer
//!
//! Authenticated-by-hash shard upload/download over the peers' HTTP
//! endpoints, with bounded retries, exponential backoff, and running
//! counters. Batch operations fan out concurrently across peers; a single
//! shard's retries stay serial inside its task.

use bytes::Bytes;
use futures::future::join_all;
use peervault_core::crypto::sha256_hex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Transfer tuning knobs
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Attempts per shard per peer
    pub max_retries: u32,
    /// Deadline for one request
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of the running transfer counters
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    pub uploads: u64,
    pub downloads: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub failures: u64,
    pub success_rate: f64,
}

#[derive(Debug, Deserialize)]
struct UploadAck {
    shard_hash: String,
}

/// Shard transfer service shared by the store and retrieve pipelines
pub struct TransferService {
    client: reqwest::Client,
    config: TransferConfig,
    uploads: AtomicU64,
    downloads: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    failures: AtomicU64,
}

impl TransferService {
    pub fn new(config: TransferConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Upload one shard to a peer.
    ///
    /// Success requires the peer to echo back the submitted shard hash,
    /// confirming a byte-for-byte verified placement. Transport failures,
    /// non-200 responses, and echo mismatches are retried up to
    /// `max_retries` with `2^attempt`-second backoff.
    pub async fn upload_shard(
        &self,
        peer_url: &str,
        file_hash: &str,
        shard_index: usize,
        shard_hash: &str,
        shard_data: &Bytes,
    ) -> bool {
        for attempt in 0..self.config.max_retries {
            let form = Form::new()
                .text("file_hash", file_hash.to_string())
                .text("shard_index", shard_index.to_string())
                .text("shard_hash", shard_hash.to_string())
                .part(
                    "shard_data",
                    Part::bytes(shard_data.to_vec())
                        .file_name(format!("{}_{}.shard", file_hash, shard_index)),
                );

            let result = self
                .client
                .post(format!("{}/shard/upload", peer_url.trim_end_matches('/')))
                .multipart(form)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<UploadAck>().await {
                        Ok(ack) if ack.shard_hash == shard_hash => {
                            self.uploads.fetch_add(1, Ordering::Relaxed);
                            self.bytes_sent
                                .fetch_add(shard_data.len() as u64, Ordering::Relaxed);
                            info!(
                                peer_url,
                                shard_index,
                                size = shard_data.len(),
                                "Uploaded shard"
                            );
                            return true;
                        }
                        Ok(_) => error!(peer_url, shard_index, "Shard hash mismatch after upload"),
                        Err(e) => error!(peer_url, shard_index, error = %e, "Bad upload response"),
                    }
                }
                Ok(response) => warn!(
                    peer_url,
                    shard_index,
                    status = %response.status(),
                    attempt = attempt + 1,
                    "Upload rejected"
                ),
                Err(e) => warn!(
                    peer_url,
                    shard_index,
                    attempt = attempt + 1,
                    error = %e,
                    "Upload failed"
                ),
            }

            if attempt + 1 < self.config.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(
            peer_url,
            shard_index,
            retries = self.config.max_retries,
            "Giving up on shard upload"
        );
        false
    }

    /// Download one shard from a peer.
    ///
    /// When `expected_hash` is supplied, a body that hashes differently is
    /// treated as a failed attempt and retried; it never counts as success.
    pub async fn download_shard(
        &self,
        peer_url: &str,
        file_hash: &str,
        shard_index: usize,
        expected_hash: Option<&str>,
    ) -> Option<Bytes> {
        for attempt in 0..self.config.max_retries {
            let result = self
                .client
                .get(format!(
                    "{}/shard/download",
                    peer_url.trim_end_matches('/')
                ))
                .query(&[
                    ("file_hash", file_hash.to_string()),
                    ("shard_index", shard_index.to_string()),
                ])
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) => {
                        if let Some(expected) = expected_hash {
                            let computed = sha256_hex(&body);
                            if computed != expected {
                                error!(
                                    peer_url,
                                    shard_index,
                                    expected,
                                    got = %computed,
                                    "Downloaded shard failed integrity check"
                                );
                                continue;
                            }
                        }

                        self.downloads.fetch_add(1, Ordering::Relaxed);
                        self.bytes_received
                            .fetch_add(body.len() as u64, Ordering::Relaxed);
                        info!(peer_url, shard_index, size = body.len(), "Downloaded shard");
                        return Some(body);
                    }
                    Err(e) => warn!(peer_url, shard_index, error = %e, "Failed reading body"),
                },
                Ok(response) => warn!(
                    peer_url,
                    shard_index,
                    status = %response.status(),
                    attempt = attempt + 1,
                    "Download rejected"
                ),
                Err(e) => warn!(
                    peer_url,
                    shard_index,
                    attempt = attempt + 1,
                    error = %e,
                    "Download failed"
                ),
            }

            if attempt + 1 < self.config.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(
            peer_url,
            shard_index,
            retries = self.config.max_retries,
            "Giving up on shard download"
        );
        None
    }

    /// Verify shard bytes against an expected hex SHA-256
    pub fn verify_integrity(&self, shard_data: &[u8], expected_hash: &str) -> bool {
        let computed = sha256_hex(shard_data);
        let valid = computed == expected_hash;
        if !valid {
            error!(expected = expected_hash, got = %computed, "Integrity check failed");
        }
        valid
    }

    /// Run a dispersal plan, all placements concurrently.
    ///
    /// `plan` maps peer URLs to the shard indices bound for them. The
    /// result maps each shard index to the peers that acknowledged with a
    /// verified hash; partial success is reported, never masked.
    pub async fn batch_upload(
        &self,
        plan: &HashMap<String, Vec<usize>>,
        file_hash: &str,
        shards: &[Bytes],
        shard_hashes: &[String],
    ) -> HashMap<usize, Vec<String>> {
        let mut tasks = Vec::new();
        for (peer_url, indices) in plan {
            for &shard_index in indices {
                if shard_index >= shards.len() {
                    warn!(shard_index, "Dispersal plan references unknown shard");
                    continue;
                }
                let peer_url = peer_url.clone();
                tasks.push(async move {
                    let ok = self
                        .upload_shard(
                            &peer_url,
                            file_hash,
                            shard_index,
                            &shard_hashes[shard_index],
                            &shards[shard_index],
                        )
                        .await;
                    (shard_index, peer_url, ok)
                });
            }
        }

        let results = join_all(tasks).await;

        let mut placed: HashMap<usize, Vec<String>> = HashMap::new();
        for (shard_index, peer_url, ok) in results {
            if ok {
                placed.entry(shard_index).or_default().push(peer_url);
            }
        }

        info!(
            placed = placed.len(),
            total = shards.len(),
            "Batch upload complete"
        );
        placed
    }

    /// Collect shards from their known locations.
    ///
    /// Phase 1 issues one concurrent attempt per shard against its first
    /// candidate peer; phase 2 walks the remaining candidates sequentially
    /// for every shard that failed. The caller checks the returned map
    /// against `required` — this method reports what it got.
    pub async fn batch_download(
        &self,
        locations: &HashMap<usize, Vec<String>>,
        file_hash: &str,
        shard_hashes: &[String],
        required: usize,
    ) -> HashMap<usize, Bytes> {
        let mut collected: HashMap<usize, Bytes> = HashMap::new();

        let first_attempts: Vec<_> = locations
            .iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(&shard_index, urls)| {
                let peer_url = urls[0].clone();
                async move {
                    let expected = shard_hashes.get(shard_index).map(|s| s.as_str());
                    let body = self
                        .download_shard(&peer_url, file_hash, shard_index, expected)
                        .await;
                    (shard_index, body)
                }
            })
            .collect();

        for (shard_index, body) in join_all(first_attempts).await {
            if let Some(body) = body {
                collected.insert(shard_index, body);
            }
        }

        // Second pass: alternative hosts for anything still missing
        for (&shard_index, urls) in locations {
            if collected.contains_key(&shard_index) {
                continue;
            }
            for peer_url in urls.iter().skip(1) {
                let expected = shard_hashes.get(shard_index).map(|s| s.as_str());
                if let Some(body) = self
                    .download_shard(peer_url, file_hash, shard_index, expected)
                    .await
                {
                    collected.insert(shard_index, body);
                    break;
                }
            }
        }

        if collected.len() < required {
            error!(
                collected = collected.len(),
                required, "Insufficient shards collected"
            );
        } else {
            debug!(
                collected = collected.len(),
                required, "Batch download complete"
            );
        }

        collected
    }

    /// Current counters plus the derived success rate
    pub fn stats(&self) -> TransferStats {
        let uploads = self.uploads.load(Ordering::Relaxed);
        let downloads = self.downloads.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let attempts = uploads + downloads + failures;

        TransferStats {
            uploads,
            downloads,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            failures,
            success_rate: if attempts > 0 {
                (uploads + downloads) as f64 / attempts as f64
            } else {
                0.0
            },
        }
    }

    /// Zero all counters
    pub fn reset_stats(&self) {
        self.uploads.store(0, Ordering::Relaxed);
        self.downloads.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

impl Default for TransferService {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_integrity() {
        let service = TransferService::default();
        let data = b"shard bytes";
        let hash = sha256_hex(data);

        assert!(service.verify_integrity(data, &hash));
        assert!(!service.verify_integrity(b"tampered", &hash));
    }

    #[test]
    fn test_stats_start_empty() {
        let service = TransferService::default();
        let stats = service.stats();

        assert_eq!(stats.uploads, 0);
        assert_eq!(stats.downloads, 0);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_success_rate_accounting() {
        let service = TransferService::default();
        service.uploads.store(3, Ordering::Relaxed);
        service.downloads.store(5, Ordering::Relaxed);
        service.failures.store(2, Ordering::Relaxed);

        let stats = service.stats();
        assert!((stats.success_rate - 0.8).abs() < f64::EPSILON);

        service.reset_stats();
        assert_eq!(service.stats().uploads, 0);
        assert_eq!(service.stats().success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_download_unreachable_peer_returns_none() {
        let service = TransferService::new(TransferConfig {
            max_retries: 1,
            timeout: Duration::from_millis(200),
        });

        // Nothing listens here; the attempt fails and is counted
        let result = service
            .download_shard("http://127.0.0.1:1", "fh", 0, None)
            .await;

        assert!(result.is_none());
        assert_eq!(service.stats().failures, 1);
    }
}
