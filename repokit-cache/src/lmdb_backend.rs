//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped cache
//! that survives process restarts and can be shared by processes on one
//! host.
//!
//! # Value layout
//!
//! `[expires_at: 8 bytes, i64 little-endian unix millis][payload]`
//!
//! Expired entries read as absent and are deleted on that read.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;

use crate::traits::{CacheError, CacheResult, CacheStats, CacheStore};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry under {key}: {len} bytes")]
    Corrupt { key: String, len: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Io(io) => CacheError::Io(io),
            LmdbCacheError::Corrupt { .. } => CacheError::Corrupt(e.to_string()),
            other => CacheError::Backend(other.to_string()),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed [`CacheStore`].
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: Arc<RwLock<CacheStats>>,
}

impl std::fmt::Debug for LmdbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCacheStore {
    /// Open (or create) a cache under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and never
        // concurrently re-opened from this process with other flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        debug!(path = %path.as_ref().display(), max_size_mb, "lmdb cache opened");

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn encode(value: &[u8], ttl: Duration) -> Vec<u8> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    /// Split a stored value into its expiry and payload.
    fn decode<'a>(key: &str, bytes: &'a [u8]) -> Result<(i64, &'a [u8]), LmdbCacheError> {
        let corrupt = || LmdbCacheError::Corrupt {
            key: key.to_string(),
            len: bytes.len(),
        };
        let header: [u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(corrupt)?;
        Ok((i64::from_le_bytes(header), &bytes[HEADER_LEN..]))
    }

    /// Delete `key` if it is still expired at `now_ms`.
    fn evict_if_expired(&self, key: &str, now_ms: i64) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let expired = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => matches!(Self::decode(key, bytes), Ok((expires_at, _)) if expires_at <= now_ms),
            None => false,
        };
        if expired {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(expired)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut expired = Vec::new();
        for item in self.db.iter(&wtxn).map_err(txn_err)? {
            let (key, value) = item.map_err(txn_err)?;
            let dead = value
                .get(..HEADER_LEN)
                .and_then(|h| <[u8; HEADER_LEN]>::try_from(h).ok())
                .map_or(true, |h| i64::from_le_bytes(h) <= now_ms);
            if dead {
                expired.push(key.to_vec());
            }
        }
        for key in &expired {
            self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        let removed = expired.len() as u64;
        self.record(|s| s.evictions += removed);
        Ok(removed)
    }

    fn get_sync(&self, key: &str) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let found = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
                Some(bytes) => {
                    let (expires_at, payload) = Self::decode(key, bytes)?;
                    Some((expires_at > now_ms).then(|| payload.to_vec()))
                }
                None => None,
            }
        };
        match found {
            Some(Some(payload)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(payload))
            }
            Some(None) => {
                let evicted = self.evict_if_expired(key, now_ms)?;
                self.record(|s| {
                    s.misses += 1;
                    if evicted {
                        s.evictions += 1;
                    }
                });
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    fn set_sync(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LmdbCacheError> {
        let bytes = Self::encode(value, ttl);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete_sync(&self, keys: &[String]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn stats_sync(&self) -> Result<CacheStats, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_err)?;
        let mut memory_bytes = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = item.map_err(txn_err)?;
            memory_bytes += (key.len() + value.len().saturating_sub(HEADER_LEN)) as u64;
        }
        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        stats.memory_bytes = memory_bytes;
        Ok(stats)
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.get_sync(key)?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        Ok(self.set_sync(key, &value, ttl)?)
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.delete_sync(keys)?)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self.stats_sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbCacheStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _dir) = create_test_store();
        store
            .set("cache:entity:Product:1", br#"{"id":1}"#.to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let value = store.get("cache:entity:Product:1").await.unwrap();
        assert_eq!(value.as_deref(), Some(br#"{"id":1}"#.as_slice()));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_miss() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.get("cache:entity:Product:404").await.unwrap(), None);
        assert_eq!(store.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let (store, _dir) = create_test_store();
        store.set("k", b"v".to_vec(), Duration::ZERO).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let (store, _dir) = create_test_store();
        for key in ["a", "b"] {
            store.set(key, b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        }
        let deleted = store
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, _dir) = create_test_store();
        store.set("dead", b"v".to_vec(), Duration::ZERO).await.unwrap();
        store.set("alive", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.get("alive").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbCacheStore::open(temp_dir.path(), 10).unwrap();
            store.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        }
        let store = LmdbCacheStore::open(temp_dir.path(), 10).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_decode_rejects_short_values() {
        let err = LmdbCacheStore::decode("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, LmdbCacheError::Corrupt { len: 3, .. }));
        let cache_err: CacheError = err.into();
        assert!(matches!(cache_err, CacheError::Corrupt(_)));
    }
}
