//! LMDB cache configuration.

use std::path::PathBuf;

use repokit_core::{env, ConfigError};

use crate::lmdb_backend::{LmdbCacheError, LmdbCacheStore};

pub const DEFAULT_CACHE_PATH: &str = "./data/cache";
pub const DEFAULT_MAX_SIZE_MB: usize = 100;

/// Where and how large the persistent cache is.
///
/// Entry TTL is a repository concern and lives in `RepoConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            max_size_mb: DEFAULT_MAX_SIZE_MB,
        }
    }
}

impl CacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    /// Load from environment variables:
    /// - `REPOKIT_CACHE_PATH` (default `./data/cache`)
    /// - `REPOKIT_CACHE_MAX_SIZE_MB` (default 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = env::string("REPOKIT_CACHE_PATH") {
            config.path = PathBuf::from(path);
        }
        let max_size_mb = env::parse::<usize>("REPOKIT_CACHE_MAX_SIZE_MB", "a whole number of megabytes")?;
        if let Some(max_size_mb) = max_size_mb {
            config.max_size_mb = max_size_mb;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "path".to_string(),
            });
        }
        Ok(())
    }

    pub fn open(&self) -> Result<LmdbCacheStore, LmdbCacheError> {
        LmdbCacheStore::open(&self.path, self.max_size_mb)
    }
}
