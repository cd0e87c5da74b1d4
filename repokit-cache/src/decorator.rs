//! Read-through caching decorator.
//!
//! Wraps any [`Repository`] and caches single-entity snapshots by primary
//! key:
//!
//! - `find_by_id` without scopes or a transaction reads the cache first;
//!   a miss falls through and populates the cache in the background. The
//!   cache read is bounded by the context's deadline and cancellation.
//! - `update`, `update_fields`, `delete`, `restore` and `force_delete`
//!   invalidate the entry before returning.
//! - `delete_batch` invalidates its keys in one background call.
//! - Everything else passes straight through.
//!
//! Cache failures never fail an operation; they are logged and the call
//! proceeds against the wrapped repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repokit_core::{Ctx, Entity, PaginationResult, RepoResult, Repository, Row, Scope};
use tracing::{debug, warn};

use crate::key::CacheKey;
use crate::tasks::CacheTasks;
use crate::traits::CacheStore;

pub struct CachedRepository<E: Entity> {
    next: Arc<dyn Repository<E>>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    tasks: CacheTasks,
}

impl<E: Entity> CachedRepository<E> {
    pub fn new(next: Arc<dyn Repository<E>>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            next,
            cache,
            ttl,
            tasks: CacheTasks::new(),
        }
    }

    /// Share a task tracker with other decorators.
    pub fn with_tasks(mut self, tasks: CacheTasks) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn tasks(&self) -> &CacheTasks {
        &self.tasks
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(id: &E::Id) -> String {
        CacheKey::for_entity::<E>(id).encode()
    }

    async fn lookup(&self, key: &str) -> Option<E> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<E>(&bytes) {
                Ok(entity) => {
                    debug!(entity = E::ENTITY_NAME, key, "cache hit");
                    Some(entity)
                }
                Err(e) => {
                    warn!(entity = E::ENTITY_NAME, key, error = %e, "undecodable cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                debug!(entity = E::ENTITY_NAME, key, "cache miss");
                None
            }
            Err(e) => {
                warn!(entity = E::ENTITY_NAME, key, error = %e, "cache read failed");
                None
            }
        }
    }

    fn populate(&self, key: String, entity: &E) {
        let bytes = match serde_json::to_vec(entity) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(entity = E::ENTITY_NAME, key = %key, error = %e, "entity not cacheable");
                return;
            }
        };
        let cache = Arc::clone(&self.cache);
        let ttl = self.ttl;
        self.tasks.spawn("populate", async move {
            if let Err(e) = cache.set(&key, bytes, ttl).await {
                warn!(entity = E::ENTITY_NAME, key = %key, error = %e, "cache populate failed");
            }
        });
    }

    async fn invalidate(&self, id: &E::Id) {
        let key = Self::key(id);
        if let Err(e) = self.cache.delete(std::slice::from_ref(&key)).await {
            warn!(entity = E::ENTITY_NAME, key = %key, error = %e, "cache invalidation failed");
        }
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for CachedRepository<E> {
    async fn create(&self, ctx: &Ctx, entity: &mut E) -> RepoResult<()> {
        self.next.create(ctx, entity).await
    }

    async fn find_by_id(&self, ctx: &Ctx, id: &E::Id, scopes: &[Scope]) -> RepoResult<Option<E>> {
        // Scoped reads may see a different row set than the cached snapshot.
        // Reads inside a transaction may see uncommitted rows.
        if !scopes.is_empty() || ctx.tx().is_some() {
            return self.next.find_by_id(ctx, id, scopes).await;
        }

        let key = Self::key(id);
        if let Some(entity) = ctx.run(async { Ok(self.lookup(&key).await) }).await? {
            return Ok(Some(entity));
        }

        let found = self.next.find_by_id(ctx, id, scopes).await?;
        if let Some(entity) = &found {
            self.populate(key, entity);
        }
        Ok(found)
    }

    async fn find_one(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<Option<E>> {
        self.next.find_one(ctx, scopes).await
    }

    async fn find_all(
        &self,
        ctx: &Ctx,
        page: i64,
        limit: i64,
        scopes: &[Scope],
    ) -> RepoResult<PaginationResult<E>> {
        self.next.find_all(ctx, page, limit, scopes).await
    }

    async fn update(&self, ctx: &Ctx, entity: &E) -> RepoResult<()> {
        self.next.update(ctx, entity).await?;
        if let Some(id) = entity.identity() {
            self.invalidate(&id).await;
        }
        Ok(())
    }

    async fn update_fields(&self, ctx: &Ctx, id: &E::Id, fields: Row) -> RepoResult<()> {
        self.next.update_fields(ctx, id, fields).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.next.delete(ctx, id).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn restore(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.next.restore(ctx, id).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn force_delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.next.force_delete(ctx, id).await?;
        self.invalidate(id).await;
        Ok(())
    }

    async fn create_batch(&self, ctx: &Ctx, entities: &mut [E]) -> RepoResult<()> {
        self.next.create_batch(ctx, entities).await
    }

    async fn delete_batch(&self, ctx: &Ctx, ids: &[E::Id]) -> RepoResult<()> {
        self.next.delete_batch(ctx, ids).await?;
        if ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = ids.iter().map(Self::key).collect();
        let cache = Arc::clone(&self.cache);
        self.tasks.spawn("invalidate_batch", async move {
            if let Err(e) = cache.delete(&keys).await {
                warn!(entity = E::ENTITY_NAME, keys = keys.len(), error = %e, "batch cache invalidation failed");
            }
        });
        Ok(())
    }

    async fn count(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<i64> {
        self.next.count(ctx, scopes).await
    }
}
