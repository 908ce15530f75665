//! Operations every sharded entity cache offers.

use std::collections::HashMap;

use async_trait::async_trait;

use super::engine::KeyShape;
use super::keys::{CacheType, GuildId, HashIdentifier, ShardId};
use crate::error::{CacheError, Result};

/// Cache contract over logical keys `K` and entities `V`.
///
/// Every operation is asynchronous; callers that must block wait on the
/// returned future from their runtime handle.
#[async_trait]
pub trait ShardedCache<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Namespace of this cache, e.g. `ROLES`.
    fn cache_type(&self) -> &CacheType;

    /// Derive the logical key of an entity.
    fn identify(&self, entity: &V) -> K;

    /// Hash field name of a logical key.
    fn stringify(&self, key: &K) -> String;

    /// Backing-store hash of one shard.
    fn format_hash_identifier(&self, shard_id: ShardId) -> Result<HashIdentifier>;

    /// Store an entity under an explicit key, overwriting any previous value.
    async fn cache_with_key(&self, shard_id: ShardId, key: K, entity: V) -> Result<()>;

    /// Store an entity under its identified key.
    async fn cache(&self, shard_id: ShardId, entity: V) -> Result<()> {
        let key = self.identify(&entity);
        self.cache_with_key(shard_id, key, entity).await
    }

    /// Store many entities with one store round trip per hash.
    ///
    /// Not atomic across hashes: a failure can leave earlier hashes written.
    async fn bulk_cache(&self, shard_id: ShardId, entities: Vec<V>) -> Result<()>;

    /// Look an entity up. `Ok(None)` means nothing is stored under `key`.
    async fn get(&self, key: &K) -> Result<Option<V>>;

    /// Like [`get`](Self::get), but absence is an error.
    async fn require(&self, key: &K) -> Result<V> {
        self.get(key).await?.ok_or_else(|| CacheError::NotFound {
            cache_type: self.cache_type().to_string(),
            field: self.stringify(key),
        })
    }

    /// Remove one entity from one shard.
    async fn delete(&self, shard_id: ShardId, key: &K) -> Result<()>;

    /// Every entity of this cache type across all shards.
    ///
    /// Bypasses the local tier; meant for administrative use.
    async fn get_all(&self) -> Result<Vec<V>>;

    /// [`get_all`](Self::get_all) keyed by stringified key. Implementations
    /// whose keys are only unique within a partition include the partition.
    async fn as_view(&self) -> Result<HashMap<String, V>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .map(|entity| (self.stringify(&self.identify(&entity)), entity))
            .collect())
    }

    /// [`get_all`](Self::get_all) keyed by a caller-chosen name, e.g. a
    /// role or channel name. Entities with the same name collapse into one
    /// entry.
    async fn as_named_view(
        &self,
        name: &(dyn for<'a> Fn(&'a V) -> String + Send + Sync),
    ) -> Result<HashMap<String, V>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .map(|entity| (name(&entity), entity))
            .collect())
    }

    /// Drop everything cached for one shard, e.g. on reconnect.
    async fn invalidate(&self, shard_id: ShardId) -> Result<()>;

    /// Apply an update observed by the origin. Same as caching with a key.
    async fn update(&self, shard_id: ShardId, key: K, entity: V) -> Result<()> {
        self.cache_with_key(shard_id, key, entity).await
    }
}

/// Type-erased maintenance surface used by the registry and admin tooling.
#[async_trait]
pub trait ShardMaintenance: Send + Sync {
    fn cache_type(&self) -> &CacheType;

    fn shape(&self) -> KeyShape;

    /// Drop everything cached for one shard.
    async fn invalidate_shard(&self, shard_id: ShardId) -> Result<()>;

    /// Drop one guild's entities cached by one shard.
    async fn purge_guild(&self, shard_id: ShardId, guild_id: GuildId) -> Result<()>;
}
