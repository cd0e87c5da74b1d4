//! Error types for repository operations

use thiserror::Error;

/// Boxed error carried from a backing store.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for all repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Repository errors.
///
/// Not-found on single-record reads is never an error: those operations
/// return `Ok(None)`. Everything a store reports is carried unchanged in
/// [`RepoError::Store`].
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Store(BoxError),

    #[error("Mapping failed for {entity}: {reason}")]
    Mapping { entity: &'static str, reason: String },

    #[error("{entity} has no identity")]
    MissingIdentity { entity: &'static str },

    #[error("Unknown relation {relation} on table {table}")]
    UnknownRelation { table: &'static str, relation: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RepoError {
    /// Wrap a backing store error.
    pub fn store(err: impl Into<BoxError>) -> Self {
        Self::Store(err.into())
    }

    pub fn mapping(entity: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Mapping {
            entity,
            reason: reason.to_string(),
        }
    }

    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn transaction(reason: impl Into<String>) -> Self {
        Self::Transaction {
            reason: reason.into(),
        }
    }

    /// Borrow the store error as a concrete type, if it is one.
    pub fn store_error<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            Self::Store(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}
