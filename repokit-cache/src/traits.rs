//! Cache store trait and statistics.
//!
//! A cache store is a plain byte-oriented key/value store with per-entry
//! expiry. Serialization of entities happens in the decorator, so stores
//! stay independent of entity types.

use std::time::Duration;

use async_trait::async_trait;

/// Error type for cache store operations.
///
/// These never reach repository callers; the decorator logs and drops them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend failed (I/O, LMDB transaction, network).
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Stored bytes are not in the expected layout.
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// Statistics lock poisoned.
    #[error("Cache lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Byte-oriented cache store with fixed per-entry TTL.
///
/// Implementations must be safe for concurrent use. An entry past its TTL
/// must read as absent.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Get the bytes stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete every key in `keys` in one call. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats::default())
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired reads included.
    pub misses: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
