//! Timing decorator.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use repokit_core::{Ctx, Entity, Operation, PaginationResult, RepoResult, Repository, Row, Scope};
use tracing::warn;

use crate::metrics::{MetricsSink, QueryStatus};

/// Records the duration and outcome of every call on the wrapped
/// repository. Results and errors pass through untouched.
pub struct MetricsRepository<E: Entity> {
    next: Arc<dyn Repository<E>>,
    sink: Arc<dyn MetricsSink>,
}

impl<E: Entity> MetricsRepository<E> {
    pub fn new(next: Arc<dyn Repository<E>>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { next, sink }
    }

    async fn timed<T, F>(&self, operation: Operation, fut: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>> + Send,
    {
        let start = Instant::now();
        let result = fut.await;
        let status = QueryStatus::from_ok(result.is_ok());
        if let Err(e) = self
            .sink
            .observe(E::ENTITY_NAME, operation, status, start.elapsed())
        {
            warn!(entity = E::ENTITY_NAME, operation = %operation, error = %e, "metrics observation dropped");
        }
        result
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MetricsRepository<E> {
    async fn create(&self, ctx: &Ctx, entity: &mut E) -> RepoResult<()> {
        self.timed(Operation::Create, self.next.create(ctx, entity)).await
    }

    async fn find_by_id(&self, ctx: &Ctx, id: &E::Id, scopes: &[Scope]) -> RepoResult<Option<E>> {
        self.timed(Operation::FindById, self.next.find_by_id(ctx, id, scopes))
            .await
    }

    async fn find_one(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<Option<E>> {
        self.timed(Operation::FindOne, self.next.find_one(ctx, scopes)).await
    }

    async fn find_all(
        &self,
        ctx: &Ctx,
        page: i64,
        limit: i64,
        scopes: &[Scope],
    ) -> RepoResult<PaginationResult<E>> {
        self.timed(Operation::FindAll, self.next.find_all(ctx, page, limit, scopes))
            .await
    }

    async fn update(&self, ctx: &Ctx, entity: &E) -> RepoResult<()> {
        self.timed(Operation::Update, self.next.update(ctx, entity)).await
    }

    async fn update_fields(&self, ctx: &Ctx, id: &E::Id, fields: Row) -> RepoResult<()> {
        self.timed(Operation::UpdateFields, self.next.update_fields(ctx, id, fields))
            .await
    }

    async fn delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.timed(Operation::Delete, self.next.delete(ctx, id)).await
    }

    async fn restore(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.timed(Operation::Restore, self.next.restore(ctx, id)).await
    }

    async fn force_delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()> {
        self.timed(Operation::ForceDelete, self.next.force_delete(ctx, id))
            .await
    }

    async fn create_batch(&self, ctx: &Ctx, entities: &mut [E]) -> RepoResult<()> {
        self.timed(Operation::CreateBatch, self.next.create_batch(ctx, entities))
            .await
    }

    async fn delete_batch(&self, ctx: &Ctx, ids: &[E::Id]) -> RepoResult<()> {
        self.timed(Operation::DeleteBatch, self.next.delete_batch(ctx, ids))
            .await
    }

    async fn count(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<i64> {
        self.timed(Operation::Count, self.next.count(ctx, scopes)).await
    }
}
