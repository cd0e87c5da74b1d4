//! PostgreSQL connection pool configuration.

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use repokit_core::{env, ConfigError, RepoError, RepoResult};
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "repokit".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Environment variables:
    /// - `REPOKIT_DB_HOST` (default: localhost)
    /// - `REPOKIT_DB_PORT` (default: 5432)
    /// - `REPOKIT_DB_NAME` (default: repokit)
    /// - `REPOKIT_DB_USER` (default: postgres)
    /// - `REPOKIT_DB_PASSWORD` (default: empty)
    /// - `REPOKIT_DB_POOL_SIZE` (default: 16)
    /// - `REPOKIT_DB_TIMEOUT` in seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::string("REPOKIT_DB_HOST").unwrap_or(defaults.host),
            port: env::parse_or("REPOKIT_DB_PORT", defaults.port),
            dbname: env::string("REPOKIT_DB_NAME").unwrap_or(defaults.dbname),
            user: env::string("REPOKIT_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("REPOKIT_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: env::parse_or("REPOKIT_DB_POOL_SIZE", defaults.max_size),
            timeout: Duration::from_secs(env::parse_or(
                "REPOKIT_DB_TIMEOUT",
                defaults.timeout.as_secs(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".into(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".into(),
                value: "0".into(),
                reason: "pool needs at least one connection".into(),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily; this does not touch the server.
    pub fn create_pool(&self) -> RepoResult<Pool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(RepoError::store)
    }
}
