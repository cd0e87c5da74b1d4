//! In-memory store.
//!
//! Tables are ordered maps from primary key to row. Integer keys are
//! generated per table when a row arrives without one. Transactions stage a
//! private copy of every table they write and apply only the rows they
//! touched on commit; dropping or rolling back a transaction discards the
//! copy.

mod eval;

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use repokit_core::{
    downcast_tx, Ctx, Query, RepoError, RepoResult, Row, TableMeta, Transaction, TxHandle,
};
use serde_json::Value;
use tracing::debug;

use crate::store::Store;
use eval::{matches_all, sort_rows, Predicate};

/// Errors raised by [`MemoryStore`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("Duplicate key {key} in table {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Invalid key in table {table}: {reason}")]
    InvalidKey { table: String, reason: String },

    #[error("Invalid LIKE pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("Transaction belongs to another store")]
    ForeignTransaction,

    #[error("Memory store lock poisoned")]
    LockPoisoned,
}

impl From<MemoryStoreError> for RepoError {
    fn from(e: MemoryStoreError) -> Self {
        RepoError::store(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    fn from_value(table: &str, value: &Value) -> Result<Self, MemoryStoreError> {
        match value {
            Value::Number(n) => n.as_i64().map(RowKey::Int).ok_or_else(|| {
                MemoryStoreError::InvalidKey {
                    table: table.to_string(),
                    reason: format!("{} is not a 64-bit integer", n),
                }
            }),
            Value::String(s) => Ok(RowKey::Text(s.clone())),
            other => Err(MemoryStoreError::InvalidKey {
                table: table.to_string(),
                reason: format!("unsupported key {}", other),
            }),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RowKey::Int(i) => Value::from(*i),
            RowKey::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(i) => write!(f, "{}", i),
            RowKey::Text(s) => f.write_str(s),
        }
    }
}

type Table = BTreeMap<RowKey, Row>;

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<HashMap<String, Table>>,
    sequences: Mutex<HashMap<String, i64>>,
}

impl Inner {
    /// Assign keys to `rows` and insert them, all or nothing.
    fn insert_rows(
        &self,
        meta: &TableMeta,
        target: &mut Table,
        rows: Vec<Row>,
    ) -> Result<(Vec<Row>, Vec<RowKey>), MemoryStoreError> {
        let pk = meta.primary_key;

        let mut explicit = BTreeSet::new();
        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key = match row.get(pk) {
                None | Some(Value::Null) => None,
                Some(value) => Some(RowKey::from_value(meta.name, value)?),
            };
            if let Some(key) = &key {
                if target.contains_key(key) || !explicit.insert(key.clone()) {
                    return Err(MemoryStoreError::DuplicateKey {
                        table: meta.name.to_string(),
                        key: key.to_string(),
                    });
                }
            }
            keys.push(key);
        }

        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        let sequence = sequences.entry(meta.name.to_string()).or_insert(0);
        for key in &explicit {
            if let RowKey::Int(i) = key {
                *sequence = (*sequence).max(*i);
            }
        }

        let mut stored = Vec::with_capacity(rows.len());
        let mut touched = Vec::with_capacity(rows.len());
        for (mut row, key) in rows.into_iter().zip(keys) {
            let key = match key {
                Some(key) => key,
                None => loop {
                    *sequence += 1;
                    let candidate = RowKey::Int(*sequence);
                    if !target.contains_key(&candidate) && !explicit.contains(&candidate) {
                        break candidate;
                    }
                },
            };
            row.insert(pk.to_string(), key.to_value());
            target.insert(key.clone(), row.clone());
            stored.push(row);
            touched.push(key);
        }
        Ok((stored, touched))
    }
}

fn select_rows(
    meta: &TableMeta,
    table: Option<&Table>,
    query: &Query,
) -> Result<Vec<Row>, MemoryStoreError> {
    let predicates = Predicate::compile_all(query.effective_filters(meta))?;
    let mut rows: Vec<Row> = table
        .into_iter()
        .flat_map(|t| t.values())
        .filter(|row| matches_all(&predicates, row))
        .cloned()
        .collect();
    sort_rows(&mut rows, &query.order);

    let offset = query.offset.unwrap_or(0);
    let rows = rows.into_iter().skip(offset);
    Ok(match query.limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    })
}

fn count_rows(meta: &TableMeta, table: Option<&Table>, query: &Query) -> Result<i64, MemoryStoreError> {
    let predicates = Predicate::compile_all(query.effective_filters(meta))?;
    let count = table
        .into_iter()
        .flat_map(|t| t.values())
        .filter(|row| matches_all(&predicates, row))
        .count();
    Ok(count as i64)
}

fn matching_keys(meta: &TableMeta, table: &Table, query: &Query) -> Result<Vec<RowKey>, MemoryStoreError> {
    let predicates = Predicate::compile_all(query.effective_filters(meta))?;
    Ok(table
        .iter()
        .filter(|(_, row)| matches_all(&predicates, row))
        .map(|(key, _)| key.clone())
        .collect())
}

fn update_rows(
    meta: &TableMeta,
    table: &mut Table,
    query: &Query,
    patch: Row,
) -> Result<(u64, Vec<RowKey>), MemoryStoreError> {
    if patch.contains_key(meta.primary_key) {
        return Err(MemoryStoreError::InvalidKey {
            table: meta.name.to_string(),
            reason: "primary key cannot be updated".to_string(),
        });
    }
    let keys = matching_keys(meta, table, query)?;
    for key in &keys {
        if let Some(row) = table.get_mut(key) {
            for (column, value) in &patch {
                row.insert(column.clone(), value.clone());
            }
        }
    }
    Ok((keys.len() as u64, keys))
}

fn delete_rows(meta: &TableMeta, table: &mut Table, query: &Query) -> Result<(u64, Vec<RowKey>), MemoryStoreError> {
    let keys = matching_keys(meta, table, query)?;
    for key in &keys {
        table.remove(key);
    }
    Ok((keys.len() as u64, keys))
}

/// In-memory [`Store`] for tests and embedded use.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`, in key order.
    pub fn snapshot(&self, table: &str) -> RepoResult<Vec<Row>> {
        let tables = self
            .inner
            .tables
            .read()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        Ok(tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Drop every table and reset key sequences.
    pub fn clear(&self) -> RepoResult<()> {
        self.inner
            .tables
            .write()
            .map_err(|_| MemoryStoreError::LockPoisoned)?
            .clear();
        self.inner
            .sequences
            .lock()
            .map_err(|_| MemoryStoreError::LockPoisoned)?
            .clear();
        Ok(())
    }

    fn own_tx<'a>(&self, ctx: &'a Ctx) -> Result<Option<&'a MemoryTx>, MemoryStoreError> {
        let Some(tx) = ctx.tx() else {
            return Ok(None);
        };
        match downcast_tx::<MemoryTx>(tx) {
            Some(mem) if Arc::ptr_eq(&mem.inner, &self.inner) => Ok(Some(mem)),
            _ => Err(MemoryStoreError::ForeignTransaction),
        }
    }

    fn read<T>(
        &self,
        ctx: &Ctx,
        table: &str,
        f: impl FnOnce(Option<&Table>) -> Result<T, MemoryStoreError>,
    ) -> Result<T, MemoryStoreError> {
        if let Some(tx) = self.own_tx(ctx)? {
            return tx.read(table, f);
        }
        let tables = self
            .inner
            .tables
            .read()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        f(tables.get(table))
    }

    fn write<T>(
        &self,
        ctx: &Ctx,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<(T, Vec<RowKey>), MemoryStoreError>,
    ) -> Result<T, MemoryStoreError> {
        if let Some(tx) = self.own_tx(ctx)? {
            return tx.write(table, f);
        }
        let mut tables = self
            .inner
            .tables
            .write()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        let (out, _) = f(tables.entry(table.to_string()).or_default())?;
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, _ctx: &Ctx) -> RepoResult<TxHandle> {
        debug!("memory transaction begin");
        Ok(Arc::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            state: Mutex::new(TxState::default()),
        }))
    }

    fn owns(&self, tx: &TxHandle) -> bool {
        downcast_tx::<MemoryTx>(tx).is_some_and(|mem| Arc::ptr_eq(&mem.inner, &self.inner))
    }

    async fn insert(&self, ctx: &Ctx, table: &TableMeta, rows: Vec<Row>) -> RepoResult<Vec<Row>> {
        let inner = Arc::clone(&self.inner);
        Ok(self.write(ctx, table.name, |t| inner.insert_rows(table, t, rows))?)
    }

    async fn select(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<Vec<Row>> {
        Ok(self.read(ctx, table.name, |t| select_rows(table, t, query))?)
    }

    async fn count(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<i64> {
        Ok(self.read(ctx, table.name, |t| count_rows(table, t, query))?)
    }

    async fn update(&self, ctx: &Ctx, table: &TableMeta, query: &Query, patch: Row) -> RepoResult<u64> {
        Ok(self.write(ctx, table.name, |t| update_rows(table, t, query, patch))?)
    }

    async fn delete(&self, ctx: &Ctx, table: &TableMeta, query: &Query) -> RepoResult<u64> {
        Ok(self.write(ctx, table.name, |t| delete_rows(table, t, query))?)
    }
}

#[derive(Debug)]
struct Staged {
    rows: Table,
    dirty: BTreeSet<RowKey>,
}

#[derive(Debug, Default)]
struct TxState {
    tables: HashMap<String, Staged>,
    finished: bool,
}

/// Transaction handed out by [`MemoryStore::begin`](Store::begin).
#[derive(Debug)]
pub struct MemoryTx {
    inner: Arc<Inner>,
    state: Mutex<TxState>,
}

impl MemoryTx {
    fn read<T>(
        &self,
        table: &str,
        f: impl FnOnce(Option<&Table>) -> Result<T, MemoryStoreError>,
    ) -> Result<T, MemoryStoreError> {
        let state = self.state.lock().map_err(|_| MemoryStoreError::LockPoisoned)?;
        if state.finished {
            return Err(MemoryStoreError::TransactionFinished);
        }
        if let Some(staged) = state.tables.get(table) {
            return f(Some(&staged.rows));
        }
        let tables = self
            .inner
            .tables
            .read()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        f(tables.get(table))
    }

    fn write<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<(T, Vec<RowKey>), MemoryStoreError>,
    ) -> Result<T, MemoryStoreError> {
        let mut state = self.state.lock().map_err(|_| MemoryStoreError::LockPoisoned)?;
        if state.finished {
            return Err(MemoryStoreError::TransactionFinished);
        }
        let staged = match state.tables.entry(table.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let rows = self
                    .inner
                    .tables
                    .read()
                    .map_err(|_| MemoryStoreError::LockPoisoned)?
                    .get(table)
                    .cloned()
                    .unwrap_or_default();
                entry.insert(Staged {
                    rows,
                    dirty: BTreeSet::new(),
                })
            }
        };

        // Work on a scratch copy so a failed write leaves the stage intact.
        let mut scratch = staged.rows.clone();
        let (out, touched) = f(&mut scratch)?;
        staged.rows = scratch;
        staged.dirty.extend(touched);
        Ok(out)
    }

    fn finish(&self) -> Result<HashMap<String, Staged>, MemoryStoreError> {
        let mut state = self.state.lock().map_err(|_| MemoryStoreError::LockPoisoned)?;
        if state.finished {
            return Err(MemoryStoreError::TransactionFinished);
        }
        state.finished = true;
        Ok(std::mem::take(&mut state.tables))
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(&self) -> RepoResult<()> {
        let staged = self.finish()?;
        let mut tables = self
            .inner
            .tables
            .write()
            .map_err(|_| MemoryStoreError::LockPoisoned)?;
        for (name, Staged { mut rows, dirty }) in staged {
            let target = tables.entry(name).or_default();
            for key in dirty {
                match rows.remove(&key) {
                    Some(row) => target.insert(key, row),
                    None => target.remove(&key),
                };
            }
        }
        debug!("memory transaction commit");
        Ok(())
    }

    async fn rollback(&self) -> RepoResult<()> {
        self.finish()?;
        debug!("memory transaction rollback");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
