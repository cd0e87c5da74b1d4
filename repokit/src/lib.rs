//! Repokit
//!
//! A generic repository engine: typed CRUD, pagination, soft delete, batch
//! writes and composable scopes over a pluggable [`Store`], with optional
//! read-through caching and Prometheus timing layered on by the
//! [`RepositoryFactory`].
//!
//! ```ignore
//! let factory = RepositoryFactory::new(Arc::new(MemoryStore::new()), RepoConfig::default().with_cache(true))
//!     .with_cache_store(Arc::new(MemoryCacheStore::new()));
//! let products = factory.repository::<Product, ProductRecord>();
//! let page = products.find_all(&Ctx::background(), 1, 20, &[scope::desc("price_cents")]).await?;
//! ```

pub mod factory;

pub use factory::RepositoryFactory;

pub use repokit_core::{
    downcast_tx, extract_tx, inject_tx, key_value, scope, CancelHandle, ConfigError, Ctx,
    Direction, Entity, EntityKey, Filter, Operation, Order, Pagination, PaginationResult, Query,
    Record, RecordMapping, Relation, RepoConfig, RepoError, RepoResult, Repository,
    RepositoryHandle, Row, Scope, TableMeta, Transaction, TxHandle, Visibility,
    DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use repokit_storage::{
    with_transaction, DbConfig, MemoryStore, MemoryStoreError, PgStore, PgStoreError,
    StorageRepository, Store,
};
pub use repokit_cache::{
    CacheConfig, CacheError, CacheKey, CacheStats, CacheStore, CacheTasks, CachedRepository,
    LmdbCacheStore, MemoryCacheStore,
};
pub use repokit_telemetry::{
    gather_default_metrics, gather_metrics, init_tracing, MetricsError, MetricsRepository,
    MetricsSink, QueryStatus, RepoMetrics, TelemetryConfig,
};
