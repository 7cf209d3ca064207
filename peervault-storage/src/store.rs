//! Content-addressed shard store
//!
//! Shards live as `{file_hash}_{shard_index}_{shard_hash}.shard` files under
//! `shards/`, so integrity can be re-verified from the filename without the
//! index. The index (`storage.db`) tracks per-shard metadata, locally
//! originated files, and a singleton stats row. All mutation is serialized
//! behind one lock; filesystem writes and index commits happen under it so
//! readers never observe a torn state.

use crate::StorageConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use peervault_core::crypto::sha256_hex;
use peervault_core::error::{PeerVaultError, Result};
use peervault_core::manifest::FileManifest;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row of the shard index
#[derive(Debug, Clone)]
pub struct ShardRecord {
    pub shard_hash: String,
    pub file_hash: String,
    pub shard_index: usize,
    pub size_bytes: u64,
    pub stored_at: DateTime<Utc>,
    pub last_verified: Option<DateTime<Utc>>,
    pub peer_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_shards: u64,
    pub total_bytes: u64,
    pub quota_bytes: u64,
    pub usage_percent: f64,
    pub available_bytes: u64,
    pub last_gc: Option<DateTime<Utc>>,
}

/// Content-addressed local shard store
pub struct ShardStore {
    shards_dir: PathBuf,
    quota_bytes: u64,
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> PeerVaultError {
    PeerVaultError::StoreCorrupt(e.to_string())
}

impl ShardStore {
    /// Open or create a shard store rooted at `config.data_dir`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let shards_dir = config.data_dir.join("shards");
        fs::create_dir_all(&shards_dir)?;

        let db_path = config.data_dir.join("storage.db");
        let conn = Connection::open(&db_path).map_err(db_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS shards (
                shard_hash TEXT PRIMARY KEY,
                file_hash TEXT NOT NULL,
                shard_index INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                stored_at TEXT NOT NULL,
                last_verified TEXT,
                peer_id TEXT,
                expires_at TEXT,
                UNIQUE(file_hash, shard_index)
            );
            CREATE TABLE IF NOT EXISTS files (
                file_hash TEXT PRIMARY KEY,
                original_name TEXT,
                total_size INTEGER,
                shards_total INTEGER,
                shards_required INTEGER,
                created_at TEXT NOT NULL,
                expires_at TEXT
            );
            CREATE TABLE IF NOT EXISTS storage_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_shards INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                last_gc TEXT,
                updated_at TEXT
            );
            INSERT OR IGNORE INTO storage_stats (id) VALUES (1);",
        )
        .map_err(db_err)?;

        info!(
            data_dir = ?config.data_dir,
            quota_bytes = config.quota_bytes,
            "Shard store opened"
        );

        Ok(Self {
            shards_dir,
            quota_bytes: config.quota_bytes,
            conn: Mutex::new(conn),
        })
    }

    /// Store a shard, returning its content hash.
    ///
    /// Re-storing the same `(file_hash, shard_index)` replaces the previous
    /// shard. Bytes are written to a temporary sibling and renamed into
    /// place, so an I/O failure leaves filesystem and index unchanged.
    pub fn put(
        &self,
        file_hash: &str,
        shard_index: usize,
        bytes: &[u8],
        peer_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let conn = self.conn.lock();

        let existing: Option<(String, u64)> = conn
            .query_row(
                "SELECT shard_hash, size_bytes FROM shards
                 WHERE file_hash = ?1 AND shard_index = ?2",
                params![file_hash, shard_index],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let total_bytes = self.total_bytes(&conn)?;
        let old_size = existing.as_ref().map(|(_, s)| *s).unwrap_or(0);
        let used = total_bytes - old_size;
        if self.quota_bytes > 0 && used + bytes.len() as u64 > self.quota_bytes {
            return Err(PeerVaultError::QuotaExceeded {
                needed: bytes.len() as u64,
                quota: self.quota_bytes,
            });
        }

        let shard_hash = sha256_hex(bytes);
        let filename = shard_filename(file_hash, shard_index, &shard_hash);
        let final_path = self.shards_dir.join(&filename);

        let tmp_path = final_path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        let now = Utc::now();
        let index_result = (|| -> rusqlite::Result<()> {
            conn.execute_batch("BEGIN")?;
            conn.execute(
                "DELETE FROM shards WHERE file_hash = ?1 AND shard_index = ?2",
                params![file_hash, shard_index],
            )?;
            conn.execute(
                "INSERT INTO shards
                 (shard_hash, file_hash, shard_index, size_bytes, stored_at,
                  last_verified, peer_id, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    shard_hash,
                    file_hash,
                    shard_index,
                    bytes.len() as u64,
                    now,
                    now,
                    peer_id,
                    expires_at
                ],
            )?;
            let shard_delta: i64 = if existing.is_some() { 0 } else { 1 };
            conn.execute(
                "UPDATE storage_stats
                 SET total_shards = total_shards + ?1,
                     total_bytes = total_bytes + ?2,
                     updated_at = ?3
                 WHERE id = 1",
                params![shard_delta, bytes.len() as i64 - old_size as i64, now],
            )?;
            conn.execute_batch("COMMIT")?;
            Ok(())
        })();

        if let Err(e) = index_result {
            let _ = conn.execute_batch("ROLLBACK");
            let had_same_filename = existing
                .as_ref()
                .map(|(old_hash, _)| *old_hash == shard_hash)
                .unwrap_or(false);
            if !had_same_filename {
                let _ = fs::remove_file(&final_path);
            }
            return Err(db_err(e));
        }

        // Replaced shard with different content: drop the stale file
        if let Some((old_hash, _)) = existing {
            if old_hash != shard_hash {
                let old_path = self
                    .shards_dir
                    .join(shard_filename(file_hash, shard_index, &old_hash));
                if let Err(e) = fs::remove_file(&old_path) {
                    warn!(path = ?old_path, error = %e, "Failed to remove replaced shard file");
                }
            }
        }

        debug!(
            file_hash = %abbrev(file_hash),
            shard_index,
            size = bytes.len(),
            "Stored shard"
        );

        Ok(shard_hash)
    }

    /// Load a shard and verify its integrity against the filename hash.
    ///
    /// On success `last_verified` is refreshed. A hash mismatch surfaces as
    /// [`PeerVaultError::CorruptShard`] without touching verification state.
    pub fn get(&self, file_hash: &str, shard_index: usize) -> Result<Vec<u8>> {
        let conn = self.conn.lock();

        let path = self
            .find_shard_file(file_hash, shard_index)?
            .ok_or_else(|| PeerVaultError::ShardNotFound {
                file_hash: file_hash.to_string(),
                shard_index,
            })?;

        let bytes = fs::read(&path)?;

        let expected = filename_shard_hash(&path).ok_or_else(|| {
            PeerVaultError::StoreCorrupt(format!("unparseable shard filename: {:?}", path))
        })?;
        let computed = sha256_hex(&bytes);
        if computed != expected {
            warn!(
                file_hash = %abbrev(file_hash),
                shard_index,
                "Shard integrity check failed"
            );
            return Err(PeerVaultError::CorruptShard {
                file_hash: file_hash.to_string(),
                shard_index,
            });
        }

        conn.execute(
            "UPDATE shards SET last_verified = ?1 WHERE shard_hash = ?2",
            params![Utc::now(), computed],
        )
        .map_err(db_err)?;

        Ok(bytes)
    }

    /// Remove a shard. Returns whether anything was deleted; idempotent.
    pub fn delete(&self, file_hash: &str, shard_index: usize) -> Result<bool> {
        let conn = self.conn.lock();
        Self::delete_locked(&self.shards_dir, &conn, file_hash, shard_index)
    }

    fn delete_locked(
        shards_dir: &Path,
        conn: &Connection,
        file_hash: &str,
        shard_index: usize,
    ) -> Result<bool> {
        let row: Option<(String, u64)> = conn
            .query_row(
                "SELECT shard_hash, size_bytes FROM shards
                 WHERE file_hash = ?1 AND shard_index = ?2",
                params![file_hash, shard_index],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((shard_hash, size_bytes)) = row else {
            return Ok(false);
        };

        let path = shards_dir.join(shard_filename(file_hash, shard_index, &shard_hash));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let result = (|| -> rusqlite::Result<()> {
            conn.execute_batch("BEGIN")?;
            conn.execute(
                "DELETE FROM shards WHERE shard_hash = ?1",
                params![shard_hash],
            )?;
            conn.execute(
                "UPDATE storage_stats
                 SET total_shards = total_shards - 1,
                     total_bytes = total_bytes - ?1,
                     updated_at = ?2
                 WHERE id = 1",
                params![size_bytes, Utc::now()],
            )?;
            conn.execute_batch("COMMIT")?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(db_err(e));
        }

        debug!(file_hash = %abbrev(file_hash), shard_index, "Deleted shard");
        Ok(true)
    }

    /// List stored shards, optionally filtered by file hash.
    pub fn list(&self, file_hash: Option<&str>) -> Result<Vec<ShardRecord>> {
        let conn = self.conn.lock();

        let mut records = Vec::new();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ShardRecord> {
            Ok(ShardRecord {
                shard_hash: row.get(0)?,
                file_hash: row.get(1)?,
                shard_index: row.get::<_, i64>(2)? as usize,
                size_bytes: row.get(3)?,
                stored_at: row.get(4)?,
                last_verified: row.get(5)?,
                peer_id: row.get(6)?,
                expires_at: row.get(7)?,
            })
        };

        match file_hash {
            Some(hash) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT shard_hash, file_hash, shard_index, size_bytes,
                                stored_at, last_verified, peer_id, expires_at
                         FROM shards WHERE file_hash = ?1
                         ORDER BY shard_index",
                    )
                    .map_err(db_err)?;
                let rows = stmt.query_map(params![hash], map_row).map_err(db_err)?;
                for row in rows {
                    records.push(row.map_err(db_err)?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT shard_hash, file_hash, shard_index, size_bytes,
                                stored_at, last_verified, peer_id, expires_at
                         FROM shards
                         ORDER BY stored_at DESC",
                    )
                    .map_err(db_err)?;
                let rows = stmt.query_map([], map_row).map_err(db_err)?;
                for row in rows {
                    records.push(row.map_err(db_err)?);
                }
            }
        }

        Ok(records)
    }

    /// Current storage statistics.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn.lock();
        let (total_shards, total_bytes, last_gc): (u64, u64, Option<DateTime<Utc>>) = conn
            .query_row(
                "SELECT total_shards, total_bytes, last_gc FROM storage_stats WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|_| PeerVaultError::StoreCorrupt("missing storage_stats row".to_string()))?;

        let usage_percent = if self.quota_bytes > 0 {
            (total_bytes as f64 / self.quota_bytes as f64) * 100.0
        } else {
            0.0
        };
        let available_bytes = if self.quota_bytes > 0 {
            self.quota_bytes.saturating_sub(total_bytes)
        } else {
            u64::MAX
        };

        Ok(StorageStats {
            total_shards,
            total_bytes,
            quota_bytes: self.quota_bytes,
            usage_percent,
            available_bytes,
            last_gc,
        })
    }

    /// Remove every shard whose `expires_at` has passed. Returns the number
    /// removed and records the sweep time.
    pub fn gc(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let expired: Vec<(String, usize)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT file_hash, shard_index FROM shards
                     WHERE expires_at IS NOT NULL AND expires_at < ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![now], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<_>>().map_err(db_err)?
        };

        let mut removed = 0;
        for (file_hash, shard_index) in &expired {
            if Self::delete_locked(&self.shards_dir, &conn, file_hash, *shard_index)? {
                removed += 1;
            }
        }

        conn.execute(
            "UPDATE storage_stats SET last_gc = ?1 WHERE id = 1",
            params![now],
        )
        .map_err(db_err)?;

        if removed > 0 {
            info!(removed, "Garbage collection removed expired shards");
        }
        Ok(removed)
    }

    /// Record a locally originated file manifest for bookkeeping.
    pub fn record_file(&self, manifest: &FileManifest) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO files
             (file_hash, original_name, total_size, shards_total,
              shards_required, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                manifest.file_hash,
                manifest.original_name,
                manifest.total_size,
                manifest.shards_total,
                manifest.shards_required,
                manifest.created_at,
                manifest.expires_at
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// File hashes this node originated.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT file_hash FROM files ORDER BY created_at DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<_>>().map_err(db_err)
    }

    fn total_bytes(&self, conn: &Connection) -> Result<u64> {
        conn.query_row(
            "SELECT total_bytes FROM storage_stats WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|_| PeerVaultError::StoreCorrupt("missing storage_stats row".to_string()))
    }

    fn find_shard_file(&self, file_hash: &str, shard_index: usize) -> Result<Option<PathBuf>> {
        let prefix = format!("{}_{}_", file_hash, shard_index);
        for entry in fs::read_dir(&self.shards_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".shard") {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }
}

fn shard_filename(file_hash: &str, shard_index: usize, shard_hash: &str) -> String {
    format!("{}_{}_{}.shard", file_hash, shard_index, shard_hash)
}

/// Extract the shard hash (third filename field) from a `.shard` path
fn filename_shard_hash(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".shard")?;
    stem.rsplit('_').next().map(|s| s.to_string())
}

fn abbrev(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_store(quota: u64) -> (TempDir, ShardStore) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path()).with_quota_bytes(quota);
        let store = ShardStore::open(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = open_store(1024 * 1024);
        let data = b"shard payload";

        let shard_hash = store.put("filehash", 0, data, None, None).unwrap();
        assert_eq!(shard_hash, sha256_hex(data));

        let loaded = store.get("filehash", 0).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_filename_encodes_integrity_witness() {
        let (dir, store) = open_store(0);
        let data = b"witness";
        let shard_hash = store.put("fh", 3, data, None, None).unwrap();

        let expected = dir
            .path()
            .join("shards")
            .join(format!("fh_3_{}.shard", shard_hash));
        assert!(expected.exists());
    }

    #[test]
    fn test_get_missing_shard() {
        let (_dir, store) = open_store(0);
        let result = store.get("nope", 0);
        assert!(matches!(result, Err(PeerVaultError::ShardNotFound { .. })));
    }

    #[test]
    fn test_corrupt_shard_detected() {
        let (dir, store) = open_store(0);
        let shard_hash = store.put("fh", 0, b"pristine bytes", None, None).unwrap();

        // Flip a byte on disk behind the store's back
        let path = dir
            .path()
            .join("shards")
            .join(format!("fh_0_{}.shard", shard_hash));
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = store.get("fh", 0);
        assert!(matches!(result, Err(PeerVaultError::CorruptShard { .. })));
    }

    #[test]
    fn test_quota_enforced() {
        let (_dir, store) = open_store(100);

        store.put("fh", 0, &[0u8; 60], None, None).unwrap();
        let result = store.put("fh", 1, &[0u8; 60], None, None);
        assert!(matches!(result, Err(PeerVaultError::QuotaExceeded { .. })));

        // Exactly filling the quota is allowed
        store.put("fh", 2, &[0u8; 40], None, None).unwrap();
        assert_eq!(store.stats().unwrap().total_bytes, 100);
    }

    #[test]
    fn test_replace_same_slot_keeps_stats_consistent() {
        let (_dir, store) = open_store(0);

        store.put("fh", 0, &[1u8; 100], None, None).unwrap();
        store.put("fh", 0, &[2u8; 40], None, None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_shards, 1);
        assert_eq!(stats.total_bytes, 40);

        let records = store.list(Some("fh")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(store.get("fh", 0).unwrap(), vec![2u8; 40]);
    }

    #[test]
    fn test_delete_idempotent() {
        let (_dir, store) = open_store(0);
        store.put("fh", 0, b"bytes", None, None).unwrap();

        assert!(store.delete("fh", 0).unwrap());
        assert!(!store.delete("fh", 0).unwrap());

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_shards, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_list_filtered_and_ordered() {
        let (_dir, store) = open_store(0);
        store.put("aaa", 1, b"one", None, None).unwrap();
        store.put("aaa", 0, b"zero", None, None).unwrap();
        store.put("bbb", 0, b"other", None, None).unwrap();

        let filtered = store.list(Some("aaa")).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].shard_index, 0);
        assert_eq!(filtered[1].shard_index, 1);

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_stats_arithmetic() {
        let (_dir, store) = open_store(1000);
        store.put("fh", 0, &[0u8; 250], None, None).unwrap();
        store.put("fh", 1, &[0u8; 250], None, None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_shards, 2);
        assert_eq!(stats.total_bytes, 500);
        assert!((stats.usage_percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.available_bytes, 500);
    }

    #[test]
    fn test_gc_removes_only_expired() {
        let (_dir, store) = open_store(0);
        let past = Utc::now() - Duration::hours(1);
        let future = Utc::now() + Duration::hours(1);

        store.put("fh", 0, b"expired", None, Some(past)).unwrap();
        store.put("fh", 1, b"fresh", None, Some(future)).unwrap();
        store.put("fh", 2, b"forever", None, None).unwrap();

        let removed = store.gc().unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(
            store.get("fh", 0),
            Err(PeerVaultError::ShardNotFound { .. })
        ));
        assert!(store.get("fh", 1).is_ok());
        assert!(store.get("fh", 2).is_ok());

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_shards, 2);
        assert_eq!(
            stats.total_bytes,
            ("fresh".len() + "forever".len()) as u64
        );
        assert!(stats.last_gc.is_some());
    }

    #[test]
    fn test_get_refreshes_last_verified() {
        let (_dir, store) = open_store(0);
        store.put("fh", 0, b"bytes", None, None).unwrap();

        let before = store.list(Some("fh")).unwrap()[0].last_verified;
        std::thread::sleep(std::time::Duration::from_millis(10));
        store.get("fh", 0).unwrap();
        let after = store.list(Some("fh")).unwrap()[0].last_verified;

        assert!(after > before);
    }

    #[test]
    fn test_record_and_list_files() {
        let (_dir, store) = open_store(0);
        let manifest = FileManifest {
            file_hash: "abc".to_string(),
            original_name: "doc.txt".to_string(),
            total_size: 10,
            encrypted_size: 26,
            shards_total: 4,
            shards_required: 2,
            shard_hashes: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            shard_locations: Default::default(),
            encryption_scheme: "AES-256-GCM".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };

        store.record_file(&manifest).unwrap();
        assert_eq!(store.list_files().unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path());

        {
            let store = ShardStore::open(&config).unwrap();
            store.put("fh", 0, b"durable", None, None).unwrap();
        }

        let store = ShardStore::open(&config).unwrap();
        assert_eq!(store.get("fh", 0).unwrap(), b"durable");
        assert_eq!(store.stats().unwrap().total_shards, 1);
    }
}
