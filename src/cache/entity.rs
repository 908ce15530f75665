//! Flat entity cache keyed by `{shard}-{cacheType}` hashes.

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use super::codec::EntityCodec;
use super::contract::{ShardMaintenance, ShardedCache};
use super::engine::{Engine, HashFilter, KeyShape};
use super::identity::Identity;
use super::keys::{CacheType, GuildId, HashIdentifier, HashLocation, ShardId};
use super::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::HashStore;

/// Two-tier cache for entities that belong to a shard only.
///
/// Clones share the same local tier and store.
pub struct EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    engine: Arc<Engine<K, V>>,
    identity: Identity<K, V>,
}

impl<K, V> Clone for EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            identity: self.identity.clone(),
        }
    }
}

impl<K, V> EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache for `cache_type`.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidCacheType`] if the tag could not be
    /// parsed back out of a hash identifier.
    pub fn new(
        cache_type: &str,
        store: Arc<dyn HashStore>,
        identity: Identity<K, V>,
        codec: impl EntityCodec<V>,
        config: &CacheConfig,
    ) -> Result<Self> {
        let cache_type = CacheType::new(cache_type)?;
        let field_of = {
            let identity = identity.clone();
            Arc::new(move |key: &K| identity.stringify(key))
        };

        let engine = Engine::new(
            cache_type,
            KeyShape::Flat,
            field_of,
            Arc::new(codec),
            store,
            config,
        );

        Ok(Self {
            engine: Arc::new(engine),
            identity,
        })
    }

    /// `{shard}-{cacheType}`
    pub fn hash_identifier(&self, shard_id: ShardId) -> HashIdentifier {
        self.engine.locate(HashLocation::flat(shard_id))
    }

    /// Look an entity up in the backing store, skipping the local tier.
    pub async fn get_fresh(&self, key: &K) -> Result<Option<V>> {
        self.engine.read_fresh(key, HashFilter::any()).await
    }

    /// Cache an entity on the runtime's worker pool.
    pub fn spawn_cache(&self, shard_id: ShardId, entity: V) -> JoinHandle<Result<()>> {
        let cache = self.clone();
        tokio::spawn(async move { cache.cache(shard_id, entity).await })
    }

    /// Delete an entity on the runtime's worker pool.
    pub fn spawn_delete(&self, shard_id: ShardId, key: K) -> JoinHandle<Result<()>> {
        let cache = self.clone();
        tokio::spawn(async move { cache.delete(shard_id, &key).await })
    }

    /// Approximate number of locally cached entities.
    pub fn local_entry_count(&self) -> u64 {
        self.engine.local_entry_count()
    }

    #[cfg(test)]
    pub(crate) async fn sync_local(&self) {
        self.engine.sync_local().await;
    }
}

#[async_trait]
impl<K, V> ShardedCache<K, V> for EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cache_type(&self) -> &CacheType {
        self.engine.cache_type()
    }

    fn identify(&self, entity: &V) -> K {
        self.identity.identify(entity)
    }

    fn stringify(&self, key: &K) -> String {
        self.identity.stringify(key)
    }

    fn format_hash_identifier(&self, shard_id: ShardId) -> Result<HashIdentifier> {
        Ok(self.hash_identifier(shard_id))
    }

    async fn cache_with_key(&self, shard_id: ShardId, key: K, entity: V) -> Result<()> {
        self.engine
            .write(HashLocation::flat(shard_id), key, entity)
            .await
    }

    async fn bulk_cache(&self, shard_id: ShardId, entities: Vec<V>) -> Result<()> {
        let entries = entities
            .into_iter()
            .map(|entity| (self.identity.identify(&entity), entity))
            .collect();
        self.engine
            .write_many(HashLocation::flat(shard_id), entries)
            .await
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.engine.read(key, HashFilter::any()).await
    }

    async fn delete(&self, shard_id: ShardId, key: &K) -> Result<()> {
        self.engine.remove(HashLocation::flat(shard_id), key).await
    }

    async fn get_all(&self) -> Result<Vec<V>> {
        let entries = self.engine.read_all(HashFilter::any()).await?;
        Ok(entries.into_iter().map(|stored| stored.entity).collect())
    }

    async fn invalidate(&self, shard_id: ShardId) -> Result<()> {
        let hash = self.hash_identifier(shard_id);
        self.engine.drop_hashes(std::slice::from_ref(&hash)).await?;
        self.engine.evict_if(move |_, cached_shard| cached_shard == shard_id);

        info!("Invalidated {} for shard {}", self.engine.cache_type(), shard_id);
        Ok(())
    }
}

#[async_trait]
impl<K, V> ShardMaintenance for EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cache_type(&self) -> &CacheType {
        self.engine.cache_type()
    }

    fn shape(&self) -> KeyShape {
        self.engine.shape()
    }

    async fn invalidate_shard(&self, shard_id: ShardId) -> Result<()> {
        ShardedCache::invalidate(self, shard_id).await
    }

    async fn purge_guild(&self, _shard_id: ShardId, _guild_id: GuildId) -> Result<()> {
        Err(CacheError::Unsupported {
            operation: "purge_guild on a flat cache",
        })
    }
}

impl<K, V> std::fmt::Debug for EntityCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("cache_type", self.engine.cache_type())
            .field("local_entries", &self.engine.local_entry_count())
            .finish()
    }
}
