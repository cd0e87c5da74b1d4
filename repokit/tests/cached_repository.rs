//! Read-through cache layered over the storage repository.

use std::sync::Arc;
use std::time::Duration;

use repokit::{
    scope, CacheKey, CacheStore, CachedRepository, Ctx, LmdbCacheStore, MemoryCacheStore,
    RepoConfig, RepoError, Repository, RepositoryFactory, Row,
};
use repokit_test_utils::assertions::assert_absent;
use repokit_test_utils::{fixtures, CountingStore, FailingCacheStore, Product, ProductRecord};
use serde_json::json;

struct Harness {
    store: Arc<CountingStore>,
    cache: Arc<MemoryCacheStore>,
    repo: CachedRepository<Product>,
}

impl Harness {
    fn new() -> Self {
        let (store, _memory) = CountingStore::over_memory();
        let cache = Arc::new(MemoryCacheStore::new());
        let storage = Arc::new(fixtures::product_repository(store.clone()));
        let repo = CachedRepository::new(storage, cache.clone(), Duration::from_secs(600));
        Self { store, cache, repo }
    }

    async fn create(&self, name: &str) -> i64 {
        let mut product = fixtures::product(name, 5.0, 1);
        self.repo.create(&Ctx::background(), &mut product).await.unwrap();
        product.id.unwrap()
    }

    fn cached(&self, id: i64) -> bool {
        self.cache.contains(&CacheKey::new("Product", id).encode())
    }

    async fn settle(&self) {
        self.repo.tasks().quiesce().await;
    }
}

#[tokio::test]
async fn test_hit_skips_storage() {
    let h = Harness::new();
    let id = h.create("A").await;
    let ctx = Ctx::background();
    assert!(!h.cached(id), "create must not populate");

    let first = h.repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    h.settle().await;
    assert!(h.cached(id));
    let selects = h.store.selects();

    let second = h.repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(h.store.selects(), selects);
}

#[tokio::test]
async fn test_repeated_reads_are_stable_across_populate() {
    let h = Harness::new();
    let id = h.create("Stable").await;
    let ctx = Ctx::background();

    let reads = read_repeatedly(&h, id, &ctx).await;
    assert!(reads.windows(2).all(|w| w[0] == w[1]));
    h.settle().await;
    assert_eq!(h.repo.find_by_id(&ctx, &id, &[]).await.unwrap(), reads[0]);
}

async fn read_repeatedly(h: &Harness, id: i64, ctx: &Ctx) -> Vec<Option<Product>> {
    let mut out = Vec::new();
    for _ in 0..5 {
        out.push(h.repo.find_by_id(ctx, &id, &[]).await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_scoped_find_never_returns_cached_value() {
    let h = Harness::new();
    let id = h.create("Original").await;
    let ctx = Ctx::background();

    h.repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    h.settle().await;

    // Plant a divergent snapshot; only bare reads may see it.
    let planted = serde_json::to_vec(&fixtures::product("Planted", 1.0, 1)).unwrap();
    h.cache
        .set(&CacheKey::new("Product", id).encode(), planted, Duration::from_secs(60))
        .await
        .unwrap();

    let scoped = h
        .repo
        .find_by_id(&ctx, &id, &[scope::with_deleted()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scoped.name, "Original");

    let bare = h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap();
    assert_eq!(bare.name, "Planted");
}

#[tokio::test]
async fn test_update_is_visible_after_quiesce() {
    let h = Harness::new();
    let id = h.create("Before").await;
    let ctx = Ctx::background();

    let mut product = h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap();
    h.settle().await;

    product.name = "After".into();
    h.repo.update(&ctx, &product).await.unwrap();
    assert!(!h.cached(id));

    h.settle().await;
    let fresh = h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap();
    assert_eq!(fresh.name, "After");

    let mut fields = Row::new();
    fields.insert("stock".into(), json!(42));
    h.settle().await;
    h.repo.update_fields(&ctx, &id, fields).await.unwrap();
    assert_eq!(h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap().stock, 42);
}

#[tokio::test]
async fn test_delete_restore_scenario_through_cache() {
    let h = Harness::new();
    let id = h.create("A").await;
    let ctx = Ctx::background();

    assert!(h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().is_some());
    h.settle().await;

    h.repo.delete(&ctx, &id).await.unwrap();
    assert_absent(&h.repo.find_by_id(&ctx, &id, &[]).await);
    h.settle().await;
    assert!(!h.cached(id), "absent rows are never cached");

    h.repo.restore(&ctx, &id).await.unwrap();
    assert_eq!(h.repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap().name, "A");
    h.settle().await;

    h.repo.force_delete(&ctx, &id).await.unwrap();
    assert!(!h.cached(id));
    assert_absent(&h.repo.find_by_id(&ctx, &id, &[scope::with_deleted()]).await);
}

#[tokio::test]
async fn test_delete_batch_invalidates_all_keys() {
    let h = Harness::new();
    let ctx = Ctx::background();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        ids.push(h.create(name).await);
    }
    for id in &ids {
        h.repo.find_by_id(&ctx, id, &[]).await.unwrap();
    }
    h.settle().await;
    assert!(ids.iter().all(|id| h.cached(*id)));

    h.repo.delete_batch(&ctx, &ids[..2]).await.unwrap();
    h.settle().await;

    assert!(!h.cached(ids[0]));
    assert!(!h.cached(ids[1]));
    assert!(h.cached(ids[2]));
    assert_absent(&h.repo.find_by_id(&ctx, &ids[0], &[]).await);
}

#[tokio::test]
async fn test_uncached_operations_leave_cache_empty() {
    let h = Harness::new();
    let ctx = Ctx::background();
    let mut batch = fixtures::products(3);
    h.repo.create_batch(&ctx, &mut batch).await.unwrap();

    h.repo.find_one(&ctx, &[]).await.unwrap();
    h.repo.find_all(&ctx, 1, 10, &[]).await.unwrap();
    assert_eq!(h.repo.count(&ctx, &[]).await.unwrap(), 3);
    h.settle().await;

    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_failing_cache_degrades_to_storage() {
    let (store, _memory) = CountingStore::over_memory();
    let cache = Arc::new(FailingCacheStore::default());
    let storage = Arc::new(fixtures::product_repository(store.clone()));
    let repo = CachedRepository::new(storage, cache.clone(), Duration::from_secs(60));
    let ctx = Ctx::background();

    let mut product = fixtures::product("Resilient", 3.0, 3);
    repo.create(&ctx, &mut product).await.unwrap();
    let id = product.id.unwrap();

    assert!(repo.find_by_id(&ctx, &id, &[]).await.unwrap().is_some());
    repo.delete(&ctx, &id).await.unwrap();
    repo.delete_batch(&ctx, &[id]).await.unwrap();
    repo.tasks().quiesce().await;

    // get, populate set, delete, batch delete
    assert_eq!(cache.calls(), 4);
    assert_absent(&repo.find_by_id(&ctx, &id, &[]).await);
}

#[tokio::test]
async fn test_lmdb_cache_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let (store, _memory) = CountingStore::over_memory();
    let cache = Arc::new(LmdbCacheStore::open(dir.path(), 10).unwrap());
    let storage = Arc::new(fixtures::product_repository(store.clone()));
    let repo = CachedRepository::new(storage, cache.clone(), Duration::from_secs(60));
    let ctx = Ctx::background();

    let mut product = fixtures::product("Durable", 8.0, 8);
    repo.create(&ctx, &mut product).await.unwrap();
    let id = product.id.unwrap();

    repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    repo.tasks().quiesce().await;
    let selects = store.selects();

    assert_eq!(repo.find_by_id(&ctx, &id, &[]).await.unwrap(), Some(product));
    assert_eq!(store.selects(), selects);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_ttl() {
    let (store, _memory) = CountingStore::over_memory();
    let cache = Arc::new(MemoryCacheStore::new());
    let storage = Arc::new(fixtures::product_repository(store.clone()));
    let repo = CachedRepository::new(storage, cache.clone(), Duration::from_secs(600));
    let ctx = Ctx::background();

    let mut product = fixtures::product("Fleeting", 1.0, 1);
    repo.create(&ctx, &mut product).await.unwrap();
    let id = product.id.unwrap();

    repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    repo.tasks().quiesce().await;
    let selects = store.selects();

    tokio::time::advance(Duration::from_secs(601)).await;
    repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    assert_eq!(store.selects(), selects + 1);
}

#[tokio::test]
async fn test_rolled_back_row_never_reaches_cache() {
    let (store, _memory) = CountingStore::over_memory();
    let cache = Arc::new(MemoryCacheStore::new());
    let factory = RepositoryFactory::new(store.clone(), RepoConfig::default().with_cache(true))
        .with_cache_store(cache.clone());
    let repo = factory.repository::<Product, ProductRecord>();
    let ctx = Ctx::background();

    let tx_repo = repo.clone();
    let mut staged_id = None;
    let result: Result<(), RepoError> = factory
        .with_transaction(&ctx, |tx_ctx| {
            let staged_id = &mut staged_id;
            async move {
                let mut product = fixtures::product("Ghost", 2.0, 2);
                tx_repo.create(&tx_ctx, &mut product).await?;
                let id = product.id.unwrap();
                *staged_id = Some(id);
                assert!(tx_repo.find_by_id(&tx_ctx, &id, &[]).await?.is_some());
                Err(RepoError::invalid_query("abort"))
            }
        })
        .await;
    assert!(result.is_err());
    factory.cache_tasks().quiesce().await;

    let id = staged_id.unwrap();
    assert!(cache.is_empty());
    assert_absent(&repo.find_by_id(&ctx, &id, &[]).await);
    assert_eq!(repo.count(&ctx, &[]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_transactional_update_is_not_cached_before_commit() {
    let (store, _memory) = CountingStore::over_memory();
    let cache = Arc::new(MemoryCacheStore::new());
    let factory = RepositoryFactory::new(store.clone(), RepoConfig::default().with_cache(true))
        .with_cache_store(cache.clone());
    let repo = factory.repository::<Product, ProductRecord>();
    let ctx = Ctx::background();

    let mut product = fixtures::product("Original", 4.0, 4);
    repo.create(&ctx, &mut product).await.unwrap();
    let id = product.id.unwrap();

    let tx_repo = repo.clone();
    let result: Result<(), RepoError> = factory
        .with_transaction(&ctx, |tx_ctx| async move {
            let mut fields = Row::new();
            fields.insert("name".into(), json!("Undone"));
            tx_repo.update_fields(&tx_ctx, &id, fields).await?;
            let seen = tx_repo.find_by_id(&tx_ctx, &id, &[]).await?;
            assert_eq!(seen.map(|p| p.name), Some("Undone".to_string()));
            Err(RepoError::invalid_query("abort"))
        })
        .await;
    assert!(result.is_err());
    factory.cache_tasks().quiesce().await;

    let found = repo.find_by_id(&ctx, &id, &[]).await.unwrap();
    assert_eq!(found.map(|p| p.name), Some("Original".to_string()));
}
