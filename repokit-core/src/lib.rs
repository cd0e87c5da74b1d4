//! Repokit Core
//!
//! Types shared by every layer of the repository engine: the
//! [`Repository`] contract, entity/record traits, query scopes, the
//! operation context with transaction propagation, pagination, errors and
//! configuration. Backends and decorators live in sibling crates.

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod pagination;
pub mod query;
pub mod repository;

pub use config::{env, RepoConfig, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL};
pub use context::{downcast_tx, extract_tx, inject_tx, CancelHandle, Ctx, Transaction, TxHandle};
pub use entity::{key_value, Entity, EntityKey, Record, RecordMapping, Relation, Row, TableMeta};
pub use error::{BoxError, ConfigError, RepoError, RepoResult};
pub use pagination::{Pagination, PaginationResult, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use query::{scope, Direction, Filter, Order, Query, Scope, Visibility};
pub use repository::{Operation, Repository, RepositoryHandle};
