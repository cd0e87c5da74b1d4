//! Repokit Storage
//!
//! The [`Store`] interface, its in-memory and PostgreSQL implementations,
//! the [`StorageRepository`] that implements the repository contract on top
//! of any store, and [`with_transaction`] for scoped units of work.

pub mod memory;
pub mod postgres;
pub mod repository;
pub mod store;
pub mod transaction;

pub use memory::{MemoryStore, MemoryStoreError, MemoryTx};
pub use postgres::{DbConfig, PgStore, PgStoreError, PgTx};
pub use repository::StorageRepository;
pub use store::Store;
pub use transaction::with_transaction;
