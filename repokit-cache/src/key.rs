//! Cache keys.

use std::fmt;

use repokit_core::Entity;

/// Namespace shared by every entity cache key.
pub const KEY_PREFIX: &str = "cache:entity";

/// Cache key for one entity snapshot: `cache:entity:{entity name}:{id}`.
///
/// Only constructible through [`CacheKey::new`] / [`CacheKey::for_entity`],
/// so every key carries its entity name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    entity: &'static str,
    id: String,
}

impl CacheKey {
    pub fn new(entity: &'static str, id: impl fmt::Display) -> Self {
        Self {
            inner: KeyInner {
                entity,
                id: id.to_string(),
            },
        }
    }

    pub fn for_entity<E: Entity>(id: &E::Id) -> Self {
        Self::new(E::ENTITY_NAME, id)
    }

    pub fn entity(&self) -> &'static str {
        self.inner.entity
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The string form stored in the cache.
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.inner.entity, self.inner.id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", KEY_PREFIX, self.inner.entity, self.inner.id)
    }
}
