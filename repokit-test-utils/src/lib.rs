//! Repokit Test Utilities
//!
//! Shared test infrastructure for the repokit workspace:
//! - Fixture entities and records (soft-deletable, hard-deletable, related)
//! - Instrumented store, cache and metrics doubles
//! - Proptest generators
//! - Custom assertions

pub use repokit_cache::{CacheError, CacheResult, CacheStats, CacheStore, MemoryCacheStore};
pub use repokit_core::{
    Ctx, Entity, Operation, Query, Record, RecordMapping, Relation, RepoError, RepoResult,
    Repository, Row, TableMeta, TxHandle,
};
pub use repokit_storage::{MemoryStore, StorageRepository, Store};
pub use repokit_telemetry::{MetricsError, MetricsSink, QueryStatus};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// FIXTURE ENTITIES
// ============================================================================

pub const PRODUCTS: TableMeta = TableMeta::new("products", "id").with_soft_delete("deleted_at");
pub const REVIEWS: TableMeta = TableMeta::new("reviews", "id");
pub const TAGS: TableMeta = TableMeta::new("tags", "id");

/// Domain product. Prices are decimal; the record stores cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<i64>,
    pub name: String,
    pub price: f64,
    pub stock: i64,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

impl Entity for Product {
    type Id = i64;
    const ENTITY_NAME: &'static str = "Product";

    fn identity(&self) -> Option<i64> {
        self.id
    }
}

/// Persisted shape of [`Product`]: soft-deletable, has many reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Option<i64>,
    pub name: String,
    pub price_cents: i64,
    pub stock: i64,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<Review>,
}

impl Record for ProductRecord {
    const TABLE: TableMeta = PRODUCTS;
    const RELATIONS: &'static [Relation] = &[Relation {
        name: "reviews",
        table: REVIEWS,
        foreign_key: "product_id",
    }];
}

impl RecordMapping<Product> for ProductRecord {
    fn from_entity(entity: &Product) -> RepoResult<Self> {
        if !entity.price.is_finite() {
            return Err(RepoError::mapping(Product::ENTITY_NAME, "price must be finite"));
        }
        Ok(Self {
            id: entity.id,
            name: entity.name.clone(),
            price_cents: (entity.price * 100.0).round() as i64,
            stock: entity.stock,
            deleted_at: None,
            reviews: entity.reviews.clone(),
        })
    }

    fn into_entity(self) -> RepoResult<Product> {
        Ok(Product {
            id: self.id,
            name: self.name,
            price: self.price_cents as f64 / 100.0,
            stock: self.stock,
            reviews: self.reviews,
        })
    }
}

/// A review; its own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Option<i64>,
    pub product_id: i64,
    pub rating: i32,
    pub body: String,
}

impl Entity for Review {
    type Id = i64;
    const ENTITY_NAME: &'static str = "Review";

    fn identity(&self) -> Option<i64> {
        self.id
    }
}

impl Record for Review {
    const TABLE: TableMeta = REVIEWS;
}

/// A hard-deletable label keyed by a client-generated UUIDv7; its own
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub label: String,
}

impl Entity for Tag {
    type Id = Uuid;
    const ENTITY_NAME: &'static str = "Tag";

    fn identity(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

impl Record for Tag {
    const TABLE: TableMeta = TAGS;
}

pub type ProductRepository = StorageRepository<Product, ProductRecord>;
pub type ReviewRepository = StorageRepository<Review, Review>;
pub type TagRepository = StorageRepository<Tag, Tag>;

// ============================================================================
// INSTRUMENTED DOUBLES
// ============================================================================

/// Store wrapper that counts calls and can fail a chosen insert.
///
/// Insert chunk sizes are kept in call order.
pub struct CountingStore {
    inner: Arc<dyn Store>,
    inserts: Mutex<Vec<usize>>,
    selects: AtomicUsize,
    counts: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    begins: AtomicUsize,
    fail_insert: Mutex<Option<usize>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            inserts: Mutex::new(Vec::new()),
            selects: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            begins: AtomicUsize::new(0),
            fail_insert: Mutex::new(None),
        }
    }

    pub fn over_memory() -> (Arc<Self>, MemoryStore) {
        let memory = MemoryStore::new();
        (Arc::new(Self::new(Arc::new(memory.clone()))), memory)
    }

    /// Fail the `n`th insert call from now (zero-based).
    pub fn fail_insert_call(&self, n: usize) {
        let base = self.insert_sizes().len();
        *lock(&self.fail_insert) = Some(base + n);
    }

    pub fn insert_sizes(&self) -> Vec<usize> {
        lock(&self.inserts).clone()
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    /// Every call that reached the wrapped store.
    pub fn total_calls(&self) -> usize {
        self.insert_sizes().len() + self.selects() + self.counts() + self.updates() + self.deletes()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Store for CountingStore {
    async fn begin(&self, ctx: &Ctx) -> RepoResult<TxHandle> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin(ctx).await
    }

    fn owns(&self, tx: &TxHandle) -> bool {
        self.inner.owns(tx)
    }

    async fn insert(&self, ctx: &Ctx, table: &TableMeta, rows: Vec<Row>) -> RepoResult<Vec<Row>> {
        let call = {
            let mut inserts = lock(&self.inserts);
            inserts.push(rows.len());
            inserts.len() - 1
        };
        if *lock(&self.fail_insert) == Some(call) {
            return Err(RepoError::store(std::io::Error::other("injected insert failure")));
        }
        self.inner.insert(ctx, table, rows).await
    }

    async fn select(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<Vec<Row>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select(ctx, table, query).await
    }

    async fn count(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<i64> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        self.inner.count(ctx, table, query).await
    }

    async fn update(&self, ctx: &Ctx, table: &TableMeta, query: &Query, patch: Row) -> RepoResult<u64> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(ctx, table, query, patch).await
    }

    async fn delete(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(ctx, table, query).await
    }
}

/// Cache store whose every call fails.
#[derive(Debug, Default)]
pub struct FailingCacheStore {
    calls: AtomicUsize,
}

impl FailingCacheStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("cache unavailable".to_string()))
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        self.fail()
    }

    async fn delete(&self, _keys: &[String]) -> CacheResult<u64> {
        self.fail()
    }
}

/// One recorded metrics observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: String,
    pub operation: Operation,
    pub status: QueryStatus,
    pub elapsed: Duration,
}

/// Metrics sink that keeps every observation.
#[derive(Debug, Default)]
pub struct RecordingSink {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    pub fn observations(&self) -> Vec<Observation> {
        lock(&self.observations).clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.observations).iter().map(|o| o.operation).collect()
    }
}

impl MetricsSink for RecordingSink {
    fn observe(
        &self,
        entity: &str,
        operation: Operation,
        status: QueryStatus,
        elapsed: Duration,
    ) -> Result<(), MetricsError> {
        lock(&self.observations).push(Observation {
            entity: entity.to_string(),
            operation,
            status,
            elapsed,
        });
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for fixture entities and paging input.

    use super::*;
    use proptest::prelude::*;

    /// A product that has not been stored yet.
    pub fn arb_new_product() -> impl Strategy<Value = Product> {
        ("[A-Za-z][A-Za-z0-9 ]{0,23}", 0i64..1_000_000, 0i64..10_000).prop_map(
            |(name, cents, stock)| Product {
                id: None,
                name,
                price: cents as f64 / 100.0,
                stock,
                reviews: Vec::new(),
            },
        )
    }

    /// Raw page/limit pairs, including out-of-range values.
    pub fn arb_page_params() -> impl Strategy<Value = (i64, i64)> {
        (-5i64..20, -5i64..250)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    pub fn product(name: &str, price: f64, stock: i64) -> Product {
        Product {
            id: None,
            name: name.to_string(),
            price,
            stock,
            reviews: Vec::new(),
        }
    }

    pub fn review(product_id: i64, rating: i32, body: &str) -> Review {
        Review {
            id: None,
            product_id,
            rating,
            body: body.to_string(),
        }
    }

    pub fn tag(label: &str) -> Tag {
        Tag {
            id: Uuid::now_v7(),
            label: label.to_string(),
        }
    }

    /// `n` distinct products named `item-0..n`.
    pub fn products(n: usize) -> Vec<Product> {
        (0..n)
            .map(|i| product(&format!("item-{i}"), 1.0 + i as f64, i as i64))
            .collect()
    }

    pub fn product_repository(store: Arc<dyn Store>) -> ProductRepository {
        StorageRepository::new(store)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for repokit results.

    use super::*;

    /// Assert that a lookup succeeded and found nothing.
    #[track_caller]
    pub fn assert_absent<T: std::fmt::Debug>(result: &RepoResult<Option<T>>) {
        match result {
            Ok(None) => {}
            other => panic!("Expected Ok(None), got: {:?}", other),
        }
    }

    /// Assert that a result is a store failure.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &RepoResult<T>) {
        match result {
            Err(RepoError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert two products match ignoring identity.
    #[track_caller]
    pub fn assert_same_product(left: &Product, right: &Product) {
        assert_eq!(left.name, right.name, "name differs");
        assert!((left.price - right.price).abs() < 0.005, "price differs: {} vs {}", left.price, right.price);
        assert_eq!(left.stock, right.stock, "stock differs");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_product_mapping_uses_cents() {
        let record = ProductRecord::from_entity(&fixtures::product("Lamp", 19.99, 3)).unwrap();
        assert_eq!(record.price_cents, 1999);
        assert!(record.deleted_at.is_none());
        let product = RecordMapping::<Product>::into_entity(record).unwrap();
        assert_eq!(product.price, 19.99);
    }

    #[test]
    fn test_non_finite_price_is_a_mapping_error() {
        let err = ProductRecord::from_entity(&fixtures::product("Bad", f64::NAN, 0)).unwrap_err();
        assert!(matches!(err, RepoError::Mapping { entity: "Product", .. }));
    }

    #[test]
    fn test_reviews_are_not_columns() {
        let mut product = fixtures::product("Desk", 120.0, 1);
        product.reviews.push(fixtures::review(1, 5, "sturdy"));
        let row = ProductRecord::from_entity(&product).unwrap().to_row().unwrap();
        assert!(!row.contains_key("reviews"));
        assert!(row.contains_key("deleted_at"));
    }

    #[tokio::test]
    async fn test_counting_store_injects_failure() {
        let (store, _memory) = CountingStore::over_memory();
        store.fail_insert_call(0);
        let ctx = Ctx::background();
        let row = ProductRecord::from_entity(&fixtures::product("A", 1.0, 1))
            .unwrap()
            .to_row()
            .unwrap();
        let result = store.insert(&ctx, &PRODUCTS, vec![row.clone()]).await;
        assertions::assert_store_error(&result);
        assert_eq!(store.insert(&ctx, &PRODUCTS, vec![row]).await.unwrap().len(), 1);
        assert_eq!(store.insert_sizes(), vec![1, 1]);
    }

    proptest! {
        #[test]
        fn prop_product_mapping_roundtrips(product in generators::arb_new_product()) {
            let record = ProductRecord::from_entity(&product).unwrap();
            let back = RecordMapping::<Product>::into_entity(record).unwrap();
            prop_assert_eq!(back, product);
        }
    }
}
