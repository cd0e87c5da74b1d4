//! The repository contract shared by the storage layer and every decorator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Ctx;
use crate::entity::{Entity, Row};
use crate::error::RepoResult;
use crate::pagination::PaginationResult;
use crate::query::Scope;

/// CRUD, pagination, soft-delete and batch access to one entity type.
///
/// Single-record reads return `Ok(None)` when nothing visible matches.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Insert `entity`, then write generated identity and store defaults
    /// back into it.
    async fn create(&self, ctx: &Ctx, entity: &mut E) -> RepoResult<()>;

    async fn find_by_id(&self, ctx: &Ctx, id: &E::Id, scopes: &[Scope]) -> RepoResult<Option<E>>;

    /// First matching record, by primary key unless a scope orders otherwise.
    async fn find_one(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<Option<E>>;

    async fn find_all(
        &self,
        ctx: &Ctx,
        page: i64,
        limit: i64,
        scopes: &[Scope],
    ) -> RepoResult<PaginationResult<E>>;

    /// Replace the persisted record with the entity's field values.
    async fn update(&self, ctx: &Ctx, entity: &E) -> RepoResult<()>;

    async fn update_fields(&self, ctx: &Ctx, id: &E::Id, fields: Row) -> RepoResult<()>;

    /// Soft delete when the record declares a deletion column, else remove.
    async fn delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()>;

    async fn restore(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()>;

    async fn force_delete(&self, ctx: &Ctx, id: &E::Id) -> RepoResult<()>;

    async fn create_batch(&self, ctx: &Ctx, entities: &mut [E]) -> RepoResult<()>;

    async fn delete_batch(&self, ctx: &Ctx, ids: &[E::Id]) -> RepoResult<()>;

    async fn count(&self, ctx: &Ctx, scopes: &[Scope]) -> RepoResult<i64>;
}

/// Shared, type-erased repository handle.
pub type RepositoryHandle<E> = Arc<dyn Repository<E>>;

/// Repository operations, as used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    FindById,
    FindOne,
    FindAll,
    Update,
    UpdateFields,
    Delete,
    Restore,
    ForceDelete,
    CreateBatch,
    DeleteBatch,
    Count,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Create,
        Operation::FindById,
        Operation::FindOne,
        Operation::FindAll,
        Operation::Update,
        Operation::UpdateFields,
        Operation::Delete,
        Operation::Restore,
        Operation::ForceDelete,
        Operation::CreateBatch,
        Operation::DeleteBatch,
        Operation::Count,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::FindById => "find_by_id",
            Operation::FindOne => "find_one",
            Operation::FindAll => "find_all",
            Operation::Update => "update",
            Operation::UpdateFields => "update_fields",
            Operation::Delete => "delete",
            Operation::Restore => "restore",
            Operation::ForceDelete => "force_delete",
            Operation::CreateBatch => "create_batch",
            Operation::DeleteBatch => "delete_batch",
            Operation::Count => "count",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_operation_labels_unique() {
        let labels: HashSet<_> = Operation::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(labels.len(), Operation::ALL.len());
        assert_eq!(Operation::FindById.to_string(), "find_by_id");
    }
}
