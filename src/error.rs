//! Error types for the cache engine and its backing store.

use std::sync::Arc;

/// Errors raised by a [`HashStore`](crate::store::HashStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis returned an error or the connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store cannot be reached.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// A key enumeration pattern could not be compiled.
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Errors raised while translating entities to and from stored bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Errors surfaced by entity caches.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Transport failure talking to the backing store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored payload could not be decoded.
    #[error("failed to decode {cache_type} entry '{field}': {source}")]
    Decode {
        cache_type: String,
        field: String,
        #[source]
        source: CodecError,
    },

    /// An entity could not be encoded for storage.
    #[error("failed to encode {cache_type} entity: {source}")]
    Encode {
        cache_type: String,
        #[source]
        source: CodecError,
    },

    /// No entity is stored under the requested key.
    #[error("no {cache_type} entry for '{field}'")]
    NotFound { cache_type: String, field: String },

    /// The operation has no meaning for this cache shape.
    #[error("operation '{operation}' is not supported by guild-scoped caches")]
    Unsupported { operation: &'static str },

    /// Cache type tags must stay parseable inside hash identifiers.
    #[error("invalid cache type '{0}': must be non-empty without '-' or glob characters")]
    InvalidCacheType(String),

    /// A registry entry exists under the same cache type with other types.
    #[error("cache '{cache_type}' already registered as {existing}")]
    TypeMismatch {
        cache_type: String,
        existing: &'static str,
    },

    /// Failure produced by a local-tier load shared between waiters.
    #[error(transparent)]
    Shared(Arc<CacheError>),
}

impl CacheError {
    /// Whether this error means the entity simply isn't cached.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
