//! Repokit Cache
//!
//! Read-through caching for repositories: the [`CachedRepository`]
//! decorator, the byte-level [`CacheStore`] trait, an in-process
//! [`MemoryCacheStore`] and a persistent LMDB-backed [`LmdbCacheStore`].

pub mod config;
pub mod decorator;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod tasks;
pub mod traits;

pub use config::CacheConfig;
pub use decorator::CachedRepository;
pub use key::{CacheKey, KEY_PREFIX};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory::MemoryCacheStore;
pub use tasks::CacheTasks;
pub use traits::{CacheError, CacheResult, CacheStats, CacheStore};
