//! Decorator composition.

use std::future::Future;
use std::sync::Arc;

use repokit_cache::{CacheStore, CacheTasks, CachedRepository};
use repokit_core::{Ctx, Entity, RecordMapping, RepoConfig, RepoResult, RepositoryHandle};
use repokit_storage::{with_transaction, StorageRepository, Store};
use repokit_telemetry::{MetricsRepository, MetricsSink, RepoMetrics};
use tracing::{debug, warn};

/// Builds repositories over one store.
///
/// Layering is fixed: storage, then the cache when `enable_cache` is set
/// and a cache store was supplied, then metrics when `enable_metrics` is
/// set. Metrics is always outermost so it times cache hits too.
#[derive(Clone)]
pub struct RepositoryFactory {
    store: Arc<dyn Store>,
    config: RepoConfig,
    cache: Option<Arc<dyn CacheStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    tasks: CacheTasks,
}

impl std::fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("config", &self.config)
            .field("cache_store", &self.cache.is_some())
            .field("metrics_sink", &self.metrics.is_some())
            .finish()
    }
}

impl RepositoryFactory {
    pub fn new(store: Arc<dyn Store>, config: RepoConfig) -> Self {
        Self {
            store,
            config,
            cache: None,
            metrics: None,
            tasks: CacheTasks::new(),
        }
    }

    /// Configuration from `REPOKIT_*` environment variables, validated.
    pub fn from_env(store: Arc<dyn Store>) -> RepoResult<Self> {
        let config = RepoConfig::from_env();
        config.validate()?;
        Ok(Self::new(store, config))
    }

    pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use `sink` instead of the global Prometheus histogram.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Background cache work of every repository this factory built.
    pub fn cache_tasks(&self) -> &CacheTasks {
        &self.tasks
    }

    pub fn caching_enabled(&self) -> bool {
        self.config.enable_cache && self.cache.is_some()
    }

    fn metrics_sink(&self) -> Option<Arc<dyn MetricsSink>> {
        if !self.config.enable_metrics {
            return None;
        }
        if let Some(sink) = &self.metrics {
            return Some(Arc::clone(sink));
        }
        match RepoMetrics::global() {
            Ok(metrics) => Some(Arc::new(metrics.clone())),
            Err(e) => {
                warn!(error = %e, "prometheus metrics unavailable, repositories built without timing");
                None
            }
        }
    }

    /// Repository for entity `E` persisted as record `M`.
    pub fn repository<E, M>(&self) -> RepositoryHandle<E>
    where
        E: Entity,
        M: RecordMapping<E>,
    {
        let mut repo: RepositoryHandle<E> = Arc::new(
            StorageRepository::<E, M>::new(Arc::clone(&self.store))
                .with_batch_size(self.config.batch_size),
        );

        let cached = match (&self.cache, self.config.enable_cache) {
            (Some(cache), true) => {
                repo = Arc::new(
                    CachedRepository::new(repo, Arc::clone(cache), self.config.cache_ttl)
                        .with_tasks(self.tasks.clone()),
                );
                true
            }
            (None, true) => {
                debug!(entity = E::ENTITY_NAME, "caching enabled without a cache store");
                false
            }
            _ => false,
        };

        let sink = self.metrics_sink();
        let timed = sink.is_some();
        if let Some(sink) = sink {
            repo = Arc::new(MetricsRepository::new(repo, sink));
        }

        debug!(
            entity = E::ENTITY_NAME,
            table = M::TABLE.name,
            cached,
            timed,
            "repository built"
        );
        repo
    }

    /// Run `f` in a transaction on this factory's store.
    ///
    /// Repositories called with the context handed to `f` share the
    /// transaction. It commits when `f` returns `Ok` and rolls back
    /// otherwise.
    pub async fn with_transaction<T, F, Fut>(&self, ctx: &Ctx, f: F) -> RepoResult<T>
    where
        F: FnOnce(Ctx) -> Fut,
        Fut: Future<Output = RepoResult<T>>,
    {
        with_transaction(self.store.as_ref(), ctx, f).await
    }
}
