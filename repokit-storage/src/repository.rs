//! The storage-backed repository.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use repokit_core::{
    key_value, Ctx, Direction, Entity, Filter, Pagination, PaginationResult, Query, Record,
    RecordMapping, RepoError, RepoResult, Repository, Row, Scope, TableMeta, Visibility,
    DEFAULT_BATCH_SIZE,
};
use serde_json::Value;
use tracing::debug;

use crate::store::Store;
use crate::transaction::with_transaction;

/// [`Repository`] over a [`Store`], mapping entities `E` through records `M`.
///
/// Owns no cross-cutting behaviour: every call is one or two store round
/// trips (two for `find_all`, one more per eager-loaded relation), each
/// bounded by the caller's context.
pub struct StorageRepository<E, M> {
    store: Arc<dyn Store>,
    batch_size: usize,
    _marker: PhantomData<fn() -> (E, M)>,
}

impl<E, M> Clone for StorageRepository<E, M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            batch_size: self.batch_size,
            _marker: PhantomData,
        }
    }
}

impl<E, M> StorageRepository<E, M>
where
    E: Entity,
    M: RecordMapping<E>,
{
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            _marker: PhantomData,
        }
    }

    /// Rows per insert statement in `create_batch`. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn table() -> TableMeta {
        M::TABLE
    }

    fn by_id(id: &E::Id) -> RepoResult<Query> {
        let key = key_value(E::ENTITY_NAME, id)?;
        Ok(Query::new().filter(Filter::Eq(M::TABLE.primary_key.to_string(), key)))
    }

    fn to_row(entity: &E) -> RepoResult<Row> {
        <M as RecordMapping<E>>::from_entity(entity)?.to_row()
    }

    fn to_entity(row: Row) -> RepoResult<E> {
        <M as RecordMapping<E>>::into_entity(M::from_row(row)?)
    }

    fn write_back(row: Row, entity: &mut E) -> RepoResult<()> {
        <M as RecordMapping<E>>::write_back(M::from_row(row)?, entity)
    }

    async fn fetch(&self, ctx: &Ctx, query: &Query) -> RepoResult<Vec<E>> {
        let table = Self::table();
        let mut rows = ctx.run(self.store.select(ctx, &table, query)).await?;
        self.preload(ctx, &query.preloads, &mut rows).await?;
        rows.into_iter().map(Self::to_entity).collect()
    }

    /// Attach has-many relations to `rows`, one select per relation.
    async fn preload(&self, ctx: &Ctx, names: &[String], rows: &mut [Row]) -> RepoResult<()> {
        let pk = M::TABLE.primary_key;
        for name in names {
            let relation = M::relation(name).ok_or_else(|| RepoError::UnknownRelation {
                table: M::TABLE.name,
                relation: name.clone(),
            })?;

            let mut owners: Vec<Value> = Vec::new();
            for row in rows.iter() {
                if let Some(key) = row.get(pk).filter(|v| !v.is_null()) {
                    if !owners.contains(key) {
                        owners.push(key.clone());
                    }
                }
            }

            let related = if owners.is_empty() {
                Vec::new()
            } else {
                let query = Query::new()
                    .filter(Filter::In(relation.foreign_key.to_string(), owners))
                    .order_by(relation.table.primary_key, Direction::Asc);
                ctx.run(self.store.select(ctx, &relation.table, &query)).await?
            };

            for row in rows.iter_mut() {
                let children: Vec<Value> = match row.get(pk) {
                    Some(owner) if !owner.is_null() => related
                        .iter()
                        .filter(|child| child.get(relation.foreign_key) == Some(owner))
                        .cloned()
                        .map(Value::Object)
                        .collect(),
                    _ => Vec::new(),
                };
                row.insert(relation.name.to_string(), Value::Array(children));
            }
        }
        Ok(())
    }

    /// Set the deletion timestamp on every live row matching `query`.
    async fn soft_delete(&self, ctx: &Ctx, column: &str, query: &Query) -> RepoResult<u64> {
        let table = Self::table();
        let mut patch = Row::new();
        patch.insert(
            column.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        ctx.run(self.store.update(ctx, &table, query, patch)).await
    }
}

#[async_trait]
impl<E, M> Repository<E> for StorageRepository<E, M>
where
    E: Entity,
    M: RecordMapping<E>,
{
    async fn create(&self, ctx: &Ctx, entity: &mut E) -> RepoResult<()> {
        let table = Self::table();
        let row = Self::to_row(entity)?;
        let stored = ctx.run(self.store.insert(ctx, &table, vec![row])).await?;
        let row = stored
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::mapping(E::ENTITY_NAME, "store returned no row"))?;
        Self::write_back(row, entity)
    }

    async fn find_by_id(&self, ctx: &Ctx, id: &E::Id, scopes: &[Scope]) -> RepoResult<Option<E>> {
        let Query { filters, .. } = Self::by_id(id)?;
        let mut query = Query::new().apply(scopes);
        query.filters.extend(filters);
        let query = query.limit(1);
        Ok(self.fetch(ctx, &query).await?.into_iter().next())
    }

    async fn find_one(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<Option<E>> {
        let mut query = Query::new().apply(scopes);
        if query.order.is_empty() {
            query = query.order_by(M::TABLE.primary_key, Direction::Asc);
        }
        let query = query.limit(1);
        Ok(self.fetch(ctx, &query).await?.into_iter().next())
    }

    async fn find_all(
        &self,
        ctx: &Ctx,
        page: i64,
        limit: i64,
        scopes: &[Scope],
    ) -> RepoResult<PaginationResult<E>> {
        let table = Self::table();
        let pagination = Pagination::new(page, limit);
        let base = Query::new().apply(scopes);

        let total = ctx.run(self.store.count(ctx, &table, &base.for_count())).await?;

        let query = base
            .limit(usize::try_from(pagination.limit()).unwrap_or(usize::MAX))
            .offset(usize::try_from(pagination.offset()).unwrap_or(usize::MAX));
        let data = self.fetch(ctx, &query).await?;
        Ok(pagination.into_result(data, total))
    }

    async fn update(&self, ctx: &Ctx, entity: &E) -> RepoResult<()> {
        let table = Self::table();
        let id = entity.identity().ok_or(RepoError::MissingIdentity {
            entity: E::ENTITY_NAME,
        })?;
        let mut row = Self::to_row(entity)?;
        row.remove(table.primary_key);
        if let Some(column) = table.soft_delete {
            row.remove(column);
        }
        if row.is_empty() {
            return Ok(());
        }
        let query = Self::by_id(&id)?;
        ctx.run(self.store.update(ctx, &table, &query, row)).await?;
        Ok(())
    }

    async fn update_fields(&self, ctx: &Ctx, id: &E::Id, fields: Row) -> RepoResult<()> {
        let table = Self::table();
        if fields.is_empty() {
            return Ok(());
        }
        if fields.contains_key(table.primary_key) {
            return Err(RepoError::invalid_query(format!(
                "primary key {} cannot be updated",
                table.primary_key
            )));
        }
        let query = Self::by_id(id)?;
        ctx.run(self.store.update(ctx, &table, &query, fields)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        let table = Self::table();
        let query = Self::by_id(id)?;
        match table.soft_delete {
            Some(column) => self.soft_delete(ctx, column, &query).await?,
            None => ctx.run(self.store.delete(ctx, &table, &query)).await?,
        };
        Ok(())
    }

    async fn restore(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        let table = Self::table();
        let Some(column) = table.soft_delete else {
            return Ok(());
        };
        let query = Self::by_id(id)?.visibility(Visibility::WithDeleted);
        let mut patch = Row::new();
        patch.insert(column.to_string(), Value::Null);
        ctx.run(self.store.update(ctx, &table, &query, patch)).await?;
        Ok(())
    }

    async fn force_delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        let table = Self::table();
        let query = Self::by_id(id)?.visibility(Visibility::WithDeleted);
        ctx.run(self.store.delete(ctx, &table, &query)).await?;
        Ok(())
    }

    async fn create_batch(&self, ctx: &Ctx, entities: &mut [E]) -> RepoResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let table = Self::table();
        let rows = entities
            .iter()
            .map(Self::to_row)
            .collect::<RepoResult<Vec<_>>>()?;
        let batch_size = self.batch_size;
        let store = self.store.as_ref();

        let stored = with_transaction(store, ctx, |tx_ctx| async move {
            let mut stored = Vec::with_capacity(rows.len());
            for chunk in rows.chunks(batch_size) {
                let inserted = tx_ctx.run(store.insert(&tx_ctx, &table, chunk.to_vec())).await?;
                if inserted.len() != chunk.len() {
                    return Err(RepoError::mapping(
                        E::ENTITY_NAME,
                        format!("inserted {} rows for {} inputs", inserted.len(), chunk.len()),
                    ));
                }
                stored.extend(inserted);
            }
            Ok(stored)
        })
        .await?;

        debug!(entity = E::ENTITY_NAME, rows = stored.len(), batch_size, "batch created");
        for (entity, row) in entities.iter_mut().zip(stored) {
            Self::write_back(row, entity)?;
        }
        Ok(())
    }

    async fn delete_batch(&self, ctx: &Ctx, ids: &[E::Id]) -> RepoResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let table = Self::table();
        let keys = ids
            .iter()
            .map(|id| key_value(E::ENTITY_NAME, id))
            .collect::<RepoResult<Vec<_>>>()?;
        let query = Query::new().filter(Filter::In(table.primary_key.to_string(), keys));
        match table.soft_delete {
            Some(column) => self.soft_delete(ctx, column, &query).await?,
            None => ctx.run(self.store.delete(ctx, &table, &query)).await?,
        };
        Ok(())
    }

    async fn count(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<i64> {
        let table = Self::table();
        let query = Query::new().apply(scopes).for_count();
        ctx.run(self.store.count(ctx, &table, &query)).await
    }
}
