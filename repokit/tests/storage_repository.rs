//! Storage repository behaviour over the in-memory store.

use std::sync::Arc;

use proptest::prelude::*;
use repokit::{
    extract_tx, inject_tx, scope, Ctx, MemoryStore, RepoError, Repository, Row, StorageRepository,
    Store, Transaction,
};
use repokit_test_utils::assertions::{assert_absent, assert_same_product, assert_store_error};
use repokit_test_utils::{
    fixtures, generators, CountingStore, Product, ProductRepository, Review,
    ReviewRepository, Tag, TagRepository,
};
use serde_json::json;

fn products(store: Arc<dyn Store>) -> ProductRepository {
    fixtures::product_repository(store)
}

fn seeded_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

async fn seed(repo: &ProductRepository, n: usize) -> Vec<Product> {
    let ctx = Ctx::background();
    let mut items = fixtures::products(n);
    for item in items.iter_mut() {
        repo.create(&ctx, item).await.unwrap();
    }
    items
}

#[tokio::test]
async fn test_create_then_find_round_trips() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();

    let mut lamp = fixtures::product("Lamp", 19.99, 4);
    repo.create(&ctx, &mut lamp).await.unwrap();
    let id = lamp.id.expect("identity written back");

    let found = repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap();
    assert_eq!(found, lamp);
    assert_same_product(&found, &fixtures::product("Lamp", 19.99, 4));
}

#[tokio::test]
async fn test_missing_ids_are_absent() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();
    assert_absent(&repo.find_by_id(&ctx, &404, &[]).await);
    assert_absent(&repo.find_one(&ctx, &[scope::eq("name", "nothing")]).await);
}

#[tokio::test]
async fn test_find_one_defaults_to_primary_key_order() {
    let repo = products(seeded_store());
    seed(&repo, 3).await;
    let ctx = Ctx::background();

    let first = repo.find_one(&ctx, &[]).await.unwrap().unwrap();
    assert_eq!(first.name, "item-0");

    let priciest = repo
        .find_one(&ctx, &[scope::desc("price_cents")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(priciest.name, "item-2");
}

#[tokio::test]
async fn test_find_all_paginates() {
    let repo = products(seeded_store());
    seed(&repo, 25).await;
    let ctx = Ctx::background();

    let page = repo.find_all(&ctx, 3, 10, &[]).await.unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.page, 3);
    assert_eq!(page.limit, 10);
    assert_eq!(page.total_pages, 3);
    let names: Vec<_> = page.data.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["item-20", "item-21", "item-22", "item-23", "item-24"]);

    let normalized = repo.find_all(&ctx, 0, 0, &[]).await.unwrap();
    assert_eq!((normalized.page, normalized.limit), (1, 10));
    assert_eq!(normalized.data.len(), 10);

    let capped = repo.find_all(&ctx, 1, 500, &[]).await.unwrap();
    assert_eq!(capped.limit, 100);
    assert_eq!(capped.data.len(), 25);

    let beyond = repo.find_all(&ctx, 9, 10, &[]).await.unwrap();
    assert!(beyond.data.is_empty());
    assert_eq!(beyond.total, 25);
}

#[tokio::test]
async fn test_find_all_counts_scoped_rows() {
    let repo = products(seeded_store());
    seed(&repo, 12).await;
    let ctx = Ctx::background();

    let scopes = [scope::gte("stock", 5), scope::desc("stock"), scope::limit(2)];
    let page = repo.find_all(&ctx, 1, 3, &scopes).await.unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.total_pages, 3);
    let stocks: Vec<_> = page.data.iter().map(|p| p.stock).collect();
    assert_eq!(stocks, [11, 10, 9]);

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["total_page"], json!(3));
}

#[tokio::test]
async fn test_soft_delete_and_restore_scenario() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();

    let mut a = fixtures::product("A", 1.0, 1);
    repo.create(&ctx, &mut a).await.unwrap();
    let id = a.id.unwrap();

    assert!(repo.find_by_id(&ctx, &id, &[]).await.unwrap().is_some());
    repo.delete(&ctx, &id).await.unwrap();
    assert_absent(&repo.find_by_id(&ctx, &id, &[]).await);
    assert_eq!(repo.count(&ctx, &[]).await.unwrap(), 0);

    let trashed = repo
        .find_by_id(&ctx, &id, &[scope::only_deleted()])
        .await
        .unwrap();
    assert_eq!(trashed.map(|p| p.name), Some("A".to_string()));
    assert_eq!(repo.count(&ctx, &[scope::with_deleted()]).await.unwrap(), 1);

    repo.restore(&ctx, &id).await.unwrap();
    let back = repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap();
    assert_eq!(back.name, "A");
    assert_eq!(repo.count(&ctx, &[scope::only_deleted()]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_force_delete_removes_soft_deleted_rows() {
    let store = seeded_store();
    let repo = products(store.clone());
    let ctx = Ctx::background();
    let items = seed(&repo, 2).await;
    let id = items[0].id.unwrap();

    repo.delete(&ctx, &id).await.unwrap();
    repo.force_delete(&ctx, &id).await.unwrap();

    assert_absent(&repo.find_by_id(&ctx, &id, &[scope::with_deleted()]).await);
    assert_eq!(store.snapshot("products").unwrap().len(), 1);
}

#[tokio::test]
async fn test_hard_delete_without_soft_delete_column() {
    let store = seeded_store();
    let tags: TagRepository = StorageRepository::new(store.clone());
    let ctx = Ctx::background();

    let mut tag = fixtures::tag("sale");
    let id = tag.id;
    tags.create(&ctx, &mut tag).await.unwrap();
    assert_eq!(tag.id, id, "client keys are kept");

    tags.delete(&ctx, &id).await.unwrap();
    assert!(store.snapshot("tags").unwrap().is_empty());

    // Nothing to restore on a hard-delete table.
    tags.restore(&ctx, &id).await.unwrap();
    assert_absent(&tags.find_by_id(&ctx, &id, &[]).await);
}

#[tokio::test]
async fn test_update_replaces_fields() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();
    let mut lamp = fixtures::product("Lamp", 10.0, 1);
    repo.create(&ctx, &mut lamp).await.unwrap();

    lamp.name = "Desk Lamp".into();
    lamp.price = 12.5;
    repo.update(&ctx, &lamp).await.unwrap();

    let found = repo.find_by_id(&ctx, &lamp.id.unwrap(), &[]).await.unwrap().unwrap();
    assert_eq!(found, lamp);
}

#[tokio::test]
async fn test_update_without_identity_fails() {
    let repo = products(seeded_store());
    let err = repo
        .update(&Ctx::background(), &fixtures::product("Ghost", 1.0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::MissingIdentity { entity: "Product" }));
}

#[tokio::test]
async fn test_update_fields_patches_columns() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();
    let items = seed(&repo, 1).await;
    let id = items[0].id.unwrap();

    let mut fields = Row::new();
    fields.insert("stock".into(), json!(99));
    repo.update_fields(&ctx, &id, fields).await.unwrap();
    assert_eq!(repo.find_by_id(&ctx, &id, &[]).await.unwrap().unwrap().stock, 99);

    repo.update_fields(&ctx, &id, Row::new()).await.unwrap();

    let mut bad = Row::new();
    bad.insert("id".into(), json!(7));
    let err = repo.update_fields(&ctx, &id, bad).await.unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery { .. }));
}

#[tokio::test]
async fn test_updates_skip_soft_deleted_rows() {
    let repo = products(seeded_store());
    let ctx = Ctx::background();
    let mut items = seed(&repo, 1).await;
    let id = items[0].id.unwrap();
    repo.delete(&ctx, &id).await.unwrap();

    items[0].name = "renamed".into();
    repo.update(&ctx, &items[0]).await.unwrap();

    let trashed = repo
        .find_by_id(&ctx, &id, &[scope::with_deleted()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trashed.name, "item-0");
}

#[tokio::test]
async fn test_preload_attaches_reviews() {
    let store = seeded_store();
    let repo = products(store.clone());
    let reviews: ReviewRepository = StorageRepository::new(store.clone());
    let ctx = Ctx::background();
    let items = seed(&repo, 2).await;
    let (first, second) = (items[0].id.unwrap(), items[1].id.unwrap());

    for (product_id, rating) in [(first, 5), (first, 3), (second, 4)] {
        let mut review = fixtures::review(product_id, rating, "ok");
        reviews.create(&ctx, &mut review).await.unwrap();
    }

    let loaded = repo
        .find_by_id(&ctx, &first, &[scope::preload("reviews")])
        .await
        .unwrap()
        .unwrap();
    let ratings: Vec<i32> = loaded.reviews.iter().map(|r| r.rating).collect();
    assert_eq!(ratings, [5, 3]);
    assert!(loaded.reviews.iter().all(|r: &Review| r.product_id == first));

    let plain = repo.find_by_id(&ctx, &first, &[]).await.unwrap().unwrap();
    assert!(plain.reviews.is_empty());

    let page = repo.find_all(&ctx, 1, 10, &[scope::preload("reviews")]).await.unwrap();
    assert_eq!(page.data[1].reviews.len(), 1);

    let err = repo
        .find_one(&ctx, &[scope::preload("warranty")])
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownRelation { table: "products", .. }));
}

#[tokio::test]
async fn test_create_batch_chunks_inserts() {
    let (store, memory) = CountingStore::over_memory();
    let repo = products(store.clone());
    let ctx = Ctx::background();

    let mut items = fixtures::products(250);
    repo.create_batch(&ctx, &mut items).await.unwrap();

    assert_eq!(store.insert_sizes(), vec![100, 100, 50]);
    assert_eq!(store.begins(), 1);
    assert!(items.iter().all(|p| p.id.is_some()));
    assert_eq!(memory.snapshot("products").unwrap().len(), 250);
    assert_eq!(repo.count(&ctx, &[]).await.unwrap(), 250);
}

#[tokio::test]
async fn test_create_batch_honours_batch_size() {
    let (store, _memory) = CountingStore::over_memory();
    let repo = products(store.clone()).with_batch_size(40);
    let mut items = fixtures::products(90);
    repo.create_batch(&Ctx::background(), &mut items).await.unwrap();
    assert_eq!(store.insert_sizes(), vec![40, 40, 10]);
}

#[tokio::test]
async fn test_create_batch_is_all_or_nothing() {
    let (store, memory) = CountingStore::over_memory();
    let repo = products(store.clone());
    store.fail_insert_call(1);

    let mut items = fixtures::products(150);
    let result = repo.create_batch(&Ctx::background(), &mut items).await;

    assert_store_error(&result);
    assert!(memory.snapshot("products").unwrap().is_empty());
    assert!(items.iter().all(|p| p.id.is_none()));
}

#[tokio::test]
async fn test_empty_batches_are_no_ops() {
    let (store, _memory) = CountingStore::over_memory();
    let repo = products(store.clone());
    let ctx = Ctx::background();

    repo.create_batch(&ctx, &mut []).await.unwrap();
    repo.delete_batch(&ctx, &[]).await.unwrap();

    assert_eq!(store.total_calls(), 0);
    assert_eq!(store.begins(), 0);
}

#[tokio::test]
async fn test_delete_batch_soft_deletes() {
    let store = seeded_store();
    let repo = products(store.clone());
    let ctx = Ctx::background();
    let items = seed(&repo, 4).await;
    let ids: Vec<i64> = items.iter().take(3).filter_map(|p| p.id).collect();

    repo.delete_batch(&ctx, &ids).await.unwrap();

    assert_eq!(repo.count(&ctx, &[]).await.unwrap(), 1);
    assert_eq!(repo.count(&ctx, &[scope::only_deleted()]).await.unwrap(), 3);
    assert_eq!(store.snapshot("products").unwrap().len(), 4);
}

#[tokio::test]
async fn test_scopes_compose() {
    let repo = products(seeded_store());
    seed(&repo, 10).await;
    let ctx = Ctx::background();

    let scopes = [
        scope::like("name", "item-%"),
        scope::is_in("stock", [2, 4, 6, 8]),
        scope::ne("stock", 4),
    ];
    assert_eq!(repo.count(&ctx, &scopes).await.unwrap(), 3);

    let page = repo
        .find_all(&ctx, 1, 10, &[scope::lt("price_cents", 400), scope::desc("id")])
        .await
        .unwrap();
    let names: Vec<_> = page.data.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["item-2", "item-1", "item-0"]);
}

#[tokio::test]
async fn test_transaction_spans_repositories() {
    let store = seeded_store();
    let dyn_store: Arc<dyn Store> = store.clone();
    let repo = products(dyn_store.clone());
    let tags: TagRepository = StorageRepository::new(dyn_store.clone());
    let ctx = Ctx::background();

    let result = repokit::with_transaction(dyn_store.as_ref(), &ctx, |tx_ctx| {
        let repo = repo.clone();
        let tags = tags.clone();
        async move {
            assert!(extract_tx(&tx_ctx).is_some());
            let mut p = fixtures::product("Tx", 1.0, 1);
            repo.create(&tx_ctx, &mut p).await?;
            let mut t = fixtures::tag("tx");
            tags.create(&tx_ctx, &mut t).await?;
            assert!(repo.find_by_id(&tx_ctx, &p.id.unwrap_or_default(), &[]).await?.is_some());
            Err::<(), _>(RepoError::transaction("abort on purpose"))
        }
    })
    .await;

    assert!(matches!(result, Err(RepoError::Transaction { .. })));
    assert!(store.snapshot("products").unwrap().is_empty());
    assert!(store.snapshot("tags").unwrap().is_empty());
}

#[tokio::test]
async fn test_injected_transaction_is_used() {
    let store = seeded_store();
    let repo = products(store.clone());
    let ctx = Ctx::background();
    assert!(extract_tx(&ctx).is_none());

    let tx = store.begin(&ctx).await.unwrap();
    let tx_ctx = inject_tx(&ctx, tx.clone());
    let mut item = fixtures::product("Pending", 2.0, 2);
    repo.create(&tx_ctx, &mut item).await.unwrap();

    assert_absent(&repo.find_by_id(&ctx, &item.id.unwrap(), &[]).await);
    assert!(repo.find_by_id(&tx_ctx, &item.id.unwrap(), &[]).await.unwrap().is_some());

    tx.commit().await.unwrap();
    assert!(repo.find_by_id(&ctx, &item.id.unwrap(), &[]).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_context_stops_operations() {
    let repo = products(seeded_store());
    let (ctx, handle) = Ctx::background().with_cancel();
    handle.cancel();

    let err = repo.count(&ctx, &[]).await.unwrap_err();
    assert!(matches!(err, RepoError::Cancelled));

    let mut items = fixtures::products(2);
    let err = repo.create_batch(&ctx, &mut items).await.unwrap_err();
    assert!(matches!(err, RepoError::Cancelled));
}

#[tokio::test]
async fn test_tag_is_its_own_record() {
    let tags: TagRepository = StorageRepository::new(seeded_store());
    let ctx = Ctx::background();
    let mut batch = vec![fixtures::tag("a"), fixtures::tag("b")];
    tags.create_batch(&ctx, &mut batch).await.unwrap();
    let found: Tag = tags.find_by_id(&ctx, &batch[1].id, &[]).await.unwrap().unwrap();
    assert_eq!(found.label, "b");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_create_find_round_trip(product in generators::arb_new_product()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let repo = products(seeded_store());
            let ctx = Ctx::background();
            let mut created = product.clone();
            repo.create(&ctx, &mut created).await.unwrap();
            let found = repo.find_by_id(&ctx, &created.id.unwrap(), &[]).await.unwrap().unwrap();
            assert_eq!(found, created);
            assert_same_product(&found, &product);
        });
    }

    #[test]
    fn prop_page_shape((page, limit) in generators::arb_page_params()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = rt.block_on(async {
            let repo = products(seeded_store());
            seed(&repo, 37).await;
            repo.find_all(&Ctx::background(), page, limit, &[]).await.unwrap()
        });
        prop_assert!(result.page >= 1);
        prop_assert!((1..=100).contains(&result.limit));
        prop_assert_eq!(result.total, 37);
        prop_assert_eq!(result.total_pages, (37 + result.limit - 1) / result.limit);
        prop_assert!(result.data.len() as i64 <= result.limit);
    }
}
