//! Entity and persisted-record traits.
//!
//! An [`Entity`] is the domain-facing value callers work with. A [`Record`]
//! is its storage-facing shape: it knows its table, its primary key, an
//! optional soft-delete column and any has-many relations. The two are tied
//! together by an explicit [`RecordMapping`] per pair.

use std::fmt::{Debug, Display};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{RepoError, RepoResult};

/// A stored row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Bounds every entity identity satisfies.
pub trait EntityKey:
    Clone + Debug + Display + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> EntityKey for T where
    T: Clone + Debug + Display + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A domain entity with an explicit identity.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: EntityKey;

    /// Stable type name used for cache keys and metric labels.
    const ENTITY_NAME: &'static str;

    /// The identity, or `None` before the entity has been created.
    fn identity(&self) -> Option<Self::Id>;
}

/// Table layout of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMeta {
    pub name: &'static str,
    pub primary_key: &'static str,
    /// Column holding the deletion timestamp, for soft-deletable tables.
    pub soft_delete: Option<&'static str>,
}

impl TableMeta {
    pub const fn new(name: &'static str, primary_key: &'static str) -> Self {
        Self {
            name,
            primary_key,
            soft_delete: None,
        }
    }

    pub const fn with_soft_delete(mut self, column: &'static str) -> Self {
        self.soft_delete = Some(column);
        self
    }
}

/// A has-many relation that can be eager-loaded by name.
///
/// Related rows are those of `table` whose `foreign_key` equals the owner's
/// primary key. They are attached to the owner row under `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub table: TableMeta,
    pub foreign_key: &'static str,
}

/// Storage-facing shape of an entity.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: TableMeta;

    const RELATIONS: &'static [Relation] = &[];

    fn relation(name: &str) -> Option<&'static Relation> {
        Self::RELATIONS.iter().find(|r| r.name == name)
    }

    /// Serialize into a row. Relation fields are not columns and are dropped.
    fn to_row(&self) -> RepoResult<Row> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut row)) => {
                for relation in Self::RELATIONS {
                    row.remove(relation.name);
                }
                Ok(row)
            }
            Ok(other) => Err(RepoError::mapping(
                Self::TABLE.name,
                format!("record must serialize to an object, got {}", other),
            )),
            Err(e) => Err(RepoError::mapping(Self::TABLE.name, e)),
        }
    }

    fn from_row(row: Row) -> RepoResult<Self> {
        serde_json::from_value(Value::Object(row)).map_err(|e| RepoError::mapping(Self::TABLE.name, e))
    }
}

/// Explicit conversion between an entity and its persisted record.
pub trait RecordMapping<E: Entity>: Record + Sized {
    fn from_entity(entity: &E) -> RepoResult<Self>;

    fn into_entity(self) -> RepoResult<E>;

    /// Copy the stored state back into the caller's entity after a write.
    fn write_back(self, entity: &mut E) -> RepoResult<()> {
        *entity = self.into_entity()?;
        Ok(())
    }
}

/// An entity that is its own record maps to itself.
impl<T> RecordMapping<T> for T
where
    T: Entity + Record,
{
    fn from_entity(entity: &T) -> RepoResult<Self> {
        Ok(entity.clone())
    }

    fn into_entity(self) -> RepoResult<T> {
        Ok(self)
    }
}

/// Serialize an identity into the JSON value stored in its key column.
pub fn key_value<K: EntityKey>(entity: &'static str, key: &K) -> RepoResult<Value> {
    serde_json::to_value(key).map_err(|e| RepoError::mapping(entity, e))
}
