//! PostgreSQL store over a `deadpool-postgres` pool.
//!
//! Any table whose columns round-trip through `jsonb_populate_record` can be
//! served; records describe their table with [`TableMeta`] and the store
//! generates the statements (see [`sql`]).

mod config;
mod sql;

pub use config::DbConfig;

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use repokit_core::{downcast_tx, Ctx, Query, RepoError, RepoResult, Row, TableMeta, Transaction, TxHandle};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::store::Store;
use sql::Statement;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised by [`PgStore`] itself, as opposed to the server.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PgStoreError {
    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("Transaction belongs to another store")]
    ForeignTransaction,

    #[error("Insert returned {returned} rows for {expected} inputs")]
    RowCountMismatch { expected: usize, returned: usize },

    #[error("Row is not a JSON object: {0}")]
    MalformedRow(String),
}

impl From<PgStoreError> for RepoError {
    fn from(e: PgStoreError) -> Self {
        RepoError::store(e)
    }
}

/// PostgreSQL-backed [`Store`].
///
/// Clones share the pool and recognise each other's transactions.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    id: u64,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("id", &self.id)
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn from_config(config: &DbConfig) -> RepoResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn own_tx<'a>(&self, ctx: &'a Ctx) -> RepoResult<Option<&'a PgTx>> {
        let Some(tx) = ctx.tx() else {
            return Ok(None);
        };
        match downcast_tx::<PgTx>(tx) {
            Some(pg) if pg.store_id == self.id => Ok(Some(pg)),
            _ => Err(PgStoreError::ForeignTransaction.into()),
        }
    }

    async fn query(&self, ctx: &Ctx, stmt: &Statement) -> RepoResult<Vec<tokio_postgres::Row>> {
        match self.own_tx(ctx)? {
            Some(tx) => {
                let guard = tx.conn.lock().await;
                let conn = guard.as_ref().ok_or(PgStoreError::TransactionFinished)?;
                run_query(conn, stmt).await
            }
            None => {
                let conn = self.pool.get().await.map_err(RepoError::store)?;
                run_query(&conn, stmt).await
            }
        }
    }

    async fn execute(&self, ctx: &Ctx, stmt: &Statement) -> RepoResult<u64> {
        match self.own_tx(ctx)? {
            Some(tx) => {
                let guard = tx.conn.lock().await;
                let conn = guard.as_ref().ok_or(PgStoreError::TransactionFinished)?;
                run_execute(conn, stmt).await
            }
            None => {
                let conn = self.pool.get().await.map_err(RepoError::store)?;
                run_execute(&conn, stmt).await
            }
        }
    }

    async fn query_json(&self, ctx: &Ctx, stmt: &Statement) -> RepoResult<Vec<Row>> {
        self.query(ctx, stmt)
            .await?
            .into_iter()
            .map(|row| {
                let value: Value = row.try_get(0).map_err(RepoError::store)?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(PgStoreError::MalformedRow(other.to_string()).into()),
                }
            })
            .collect()
    }
}

async fn run_query(client: &Client, stmt: &Statement) -> RepoResult<Vec<tokio_postgres::Row>> {
    client
        .query(stmt.sql.as_str(), &stmt.param_refs())
        .await
        .map_err(RepoError::store)
}

async fn run_execute(client: &Client, stmt: &Statement) -> RepoResult<u64> {
    client
        .execute(stmt.sql.as_str(), &stmt.param_refs())
        .await
        .map_err(RepoError::store)
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, _ctx: &Ctx) -> RepoResult<TxHandle> {
        let conn = self.pool.get().await.map_err(RepoError::store)?;
        conn.batch_execute("BEGIN").await.map_err(RepoError::store)?;
        debug!(store_id = self.id, "postgres transaction begin");
        Ok(Arc::new(PgTx {
            store_id: self.id,
            conn: Mutex::new(Some(conn)),
        }))
    }

    fn owns(&self, tx: &TxHandle) -> bool {
        downcast_tx::<PgTx>(tx).is_some_and(|pg| pg.store_id == self.id)
    }

    async fn insert(&self, ctx: &Ctx, table: &TableMeta, rows: Vec<Row>) -> RepoResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = sql::insert(table, &rows)?;
        let stored = if stmt.params.is_empty() {
            // DEFAULT VALUES inserts one row per statement.
            let mut stored = Vec::with_capacity(rows.len());
            for _ in &rows {
                stored.extend(self.query_json(ctx, &stmt).await?);
            }
            stored
        } else {
            self.query_json(ctx, &stmt).await?
        };
        if stored.len() != rows.len() {
            return Err(PgStoreError::RowCountMismatch {
                expected: rows.len(),
                returned: stored.len(),
            }
            .into());
        }
        Ok(stored)
    }

    async fn select(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<Vec<Row>> {
        let stmt = sql::select(table, query)?;
        self.query_json(ctx, &stmt).await
    }

    async fn count(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<i64> {
        let stmt = sql::count(table, query)?;
        let rows = self.query(ctx, &stmt).await?;
        match rows.first() {
            Some(row) => row.try_get(0).map_err(RepoError::store),
            None => Ok(0),
        }
    }

    async fn update(&self, ctx: &Ctx, table: &TableMeta, query: &Query, patch: Row) -> RepoResult<u64> {
        let stmt = sql::update(table, query, &patch)?;
        self.execute(ctx, &stmt).await
    }

    async fn delete(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<u64> {
        let stmt = sql::delete(table, query)?;
        self.execute(ctx, &stmt).await
    }
}

/// A transaction pinned to one pooled connection.
pub struct PgTx {
    store_id: u64,
    conn: Mutex<Option<Object>>,
}

impl PgTx {
    async fn finish(&self, statement: &str) -> RepoResult<()> {
        let conn = self
            .conn
            .lock()
            .await
            .take()
            .ok_or(PgStoreError::TransactionFinished)?;
        match conn.batch_execute(statement).await {
            Ok(()) => {
                debug!(store_id = self.store_id, statement, "postgres transaction finished");
                Ok(())
            }
            Err(e) => {
                // Connection state is unknown; keep it out of the pool.
                drop(Object::take(conn));
                Err(RepoError::store(e))
            }
        }
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(&self) -> RepoResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> RepoResult<()> {
        self.finish("ROLLBACK").await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            // Closing the connection makes the server roll back.
            warn!(store_id = self.store_id, "postgres transaction dropped while open");
            drop(Object::take(conn));
        }
    }
}
