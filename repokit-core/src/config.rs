//! Repository configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default rows per insert statement in `create_batch`.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Switches and tunables for building repositories.
///
/// Caching additionally requires a cache store to be supplied to the
/// factory; without one `enable_cache` is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub enable_cache: bool,
    pub enable_metrics: bool,
    pub cache_ttl: Duration,
    pub batch_size: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            enable_cache: false,
            enable_metrics: false,
            cache_ttl: DEFAULT_CACHE_TTL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl RepoConfig {
    /// Create RepoConfig from environment variables.
    ///
    /// Environment variables:
    /// - `REPOKIT_ENABLE_CACHE`: "true" or "false" (default: false)
    /// - `REPOKIT_ENABLE_METRICS`: "true" or "false" (default: false)
    /// - `REPOKIT_CACHE_TTL_SECS`: Cache entry lifetime (default: 600)
    /// - `REPOKIT_BATCH_SIZE`: Rows per batch insert (default: 100)
    pub fn from_env() -> Self {
        Self {
            enable_cache: env::flag("REPOKIT_ENABLE_CACHE", false),
            enable_metrics: env::flag("REPOKIT_ENABLE_METRICS", false),
            cache_ttl: Duration::from_secs(env::parse_or(
                "REPOKIT_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL.as_secs(),
            )),
            batch_size: env::parse_or("REPOKIT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.enable_cache && self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl".into(),
                value: "0s".into(),
                reason: "cache entries would expire immediately".into(),
            });
        }
        Ok(())
    }
}

/// Environment lookups shared by the `from_env` constructors.
pub mod env {
    use std::str::FromStr;

    use crate::error::ConfigError;

    /// Trimmed value of `name`, `None` when unset or blank.
    pub fn string(name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Parsed value of `name`; `default` when unset or unparsable.
    pub fn parse_or<T: FromStr>(name: &str, default: T) -> T {
        string(name).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    /// Parsed value of `name`. A set but unparsable value is an error.
    pub fn parse<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>, ConfigError> {
        match string(name) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw,
                reason: format!("expected {}", expected),
            }),
        }
    }

    /// `true`, `1` or `yes` (any case) enable the flag; anything else set disables it.
    pub fn flag(name: &str, default: bool) -> bool {
        string(name).map(|s| parse_flag(&s)).unwrap_or(default)
    }

    pub(crate) fn parse_flag(value: &str) -> bool {
        matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
    }
}
