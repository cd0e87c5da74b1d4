//! The outbound store interface.

use async_trait::async_trait;
use repokit_core::{Ctx, Query, RepoResult, Row, TableMeta, TxHandle};

/// A relational-style backing store addressed by table and [`Query`].
///
/// Every method runs on the transaction carried by `ctx` when that
/// transaction was opened by this store, and on the store's default
/// connection otherwise. A transaction opened by a different store is
/// rejected. Soft-delete visibility is applied through
/// [`Query::effective_filters`]; eager-loads are not a store concern.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Open a transaction. Callers normally go through
    /// [`with_transaction`](crate::with_transaction).
    async fn begin(&self, ctx: &Ctx) -> RepoResult<TxHandle>;

    /// Whether `tx` was opened by this store.
    fn owns(&self, tx: &TxHandle) -> bool;

    /// Insert `rows` in one statement and return them as stored, in order,
    /// with generated keys and defaults filled in.
    async fn insert(&self, ctx: &Ctx, table: &TableMeta, rows: Vec<Row>) -> RepoResult<Vec<Row>>;

    async fn select(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<Vec<Row>>;

    /// Matching rows, ignoring ordering and paging.
    async fn count(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<i64>;

    /// Merge `patch` into every matching row. Returns the number of rows
    /// changed.
    async fn update(&self, ctx: &Ctx, table: &TableMeta, query: &Query, patch: Row) -> RepoResult<u64>;

    /// Remove every matching row. Returns the number of rows removed.
    async fn delete(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<u64>;
}
