//! Backing store client.
//!
//! The cache engine only needs hash-per-key semantics plus a set used as a
//! secondary index of hash identifiers per cache type:
//! - `redis_store` - Production store over a multiplexed Redis connection
//! - `memory` - In-process store for tests and single-process setups

mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, StoreConfig};

/// Hash-map-per-key store shared by all cache participants.
///
/// Index arguments name the set that tracks which hashes exist for a cache
/// type. Implementations must update the index together with the write.
#[async_trait]
pub trait HashStore: Send + Sync + 'static {
    /// Set one field and register `hash` in `index`.
    async fn hset(
        &self,
        index: &str,
        hash: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Set many fields of one hash using a single connection round trip.
    async fn hset_many(
        &self,
        index: &str,
        hash: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<(), StoreError>;

    /// Read one field.
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Read every field of a hash. Missing hashes yield an empty list.
    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Remove one field. A hash left empty is dropped from `index` in the
    /// same step.
    async fn hdel(&self, index: &str, hash: &str, field: &str) -> Result<(), StoreError>;

    /// Delete whole hashes and drop them from `index`.
    async fn del(&self, index: &str, hashes: &[String]) -> Result<(), StoreError>;

    /// Hash identifiers registered in `index`.
    async fn members(&self, index: &str) -> Result<Vec<String>, StoreError>;

    /// Keys matching a glob pattern, enumerated incrementally.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
