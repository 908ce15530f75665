//! Cache registry - One shared cache per cache type per process.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::codec::EntityCodec;
use super::contract::ShardMaintenance;
use super::engine::KeyShape;
use super::identity::{GuildIdentity, Identity};
use super::keys::{GuildId, ShardId};
use super::snowflake::{GuildScoped, Snowflake};
use super::{CacheConfig, EntityCache, GuildCache};
use crate::error::{CacheError, Result};
use crate::store::HashStore;

/// Central registry of the entity caches of one process.
///
/// Gateway handlers for different events resolve the same cache by type
/// instead of building their own, so they share one local tier. Shard-wide
/// maintenance fans out to every registered cache.
///
/// ## Example
///
/// ```rust,ignore
/// let registry = CacheRegistry::new(store, CacheConfig::default());
/// let roles: GuildCache<u64, Role> = registry.guild_snowflake(CacheType::ROLES)?;
///
/// // Shard 3 reconnected
/// registry.invalidate_shard(3).await?;
/// ```
#[derive(Clone)]
pub struct CacheRegistry {
    store: Arc<dyn HashStore>,
    config: CacheConfig,
    caches: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

/// Internal cache entry storing a type-erased cache.
struct CacheEntry {
    cache: Box<dyn Any + Send + Sync>,
    maintenance: Arc<dyn ShardMaintenance>,
    type_id: TypeId,
    type_name: &'static str,
}

impl CacheRegistry {
    /// Create a registry whose caches share `store` and `config`.
    pub fn new(store: Arc<dyn HashStore>, config: CacheConfig) -> Self {
        info!("Cache registry initialized");
        Self {
            store,
            config,
            caches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn HashStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get or create a flat cache.
    pub fn entity<K, V>(
        &self,
        cache_type: &str,
        identity: Identity<K, V>,
        codec: impl EntityCodec<V>,
    ) -> Result<EntityCache<K, V>>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.get_or_insert_with(cache_type, || {
            EntityCache::new(cache_type, Arc::clone(&self.store), identity, codec, &self.config)
        })
    }

    /// Get or create a guild-scoped cache.
    pub fn guild<K, V>(
        &self,
        cache_type: &str,
        identity: GuildIdentity<K, V>,
        codec: impl EntityCodec<V>,
    ) -> Result<GuildCache<K, V>>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.get_or_insert_with(cache_type, || {
            GuildCache::new(cache_type, Arc::clone(&self.store), identity, codec, &self.config)
        })
    }

    /// Get or create a JSON snowflake cache.
    pub fn snowflake<V>(&self, cache_type: &str) -> Result<EntityCache<u64, V>>
    where
        V: Snowflake + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.get_or_insert_with(cache_type, || {
            EntityCache::snowflake(cache_type, Arc::clone(&self.store), &self.config)
        })
    }

    /// Get or create a JSON snowflake guild cache.
    pub fn guild_snowflake<V>(&self, cache_type: &str) -> Result<GuildCache<u64, V>>
    where
        V: Snowflake + GuildScoped + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.get_or_insert_with(cache_type, || {
            GuildCache::snowflake(cache_type, Arc::clone(&self.store), &self.config)
        })
    }

    /// Get an existing cache by type.
    ///
    /// Returns `Ok(None)` if no cache is registered under `cache_type`.
    ///
    /// # Errors
    /// Returns [`CacheError::TypeMismatch`] if the cache exists with other types.
    pub fn get<C>(&self, cache_type: &str) -> Result<Option<C>>
    where
        C: Clone + Send + Sync + 'static,
    {
        let caches = self.caches.read();
        caches
            .get(cache_type)
            .map(|entry| downcast::<C>(cache_type, entry))
            .transpose()
    }

    fn get_or_insert_with<C, F>(&self, cache_type: &str, create: F) -> Result<C>
    where
        C: ShardMaintenance + Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<C>,
    {
        if let Some(cache) = self.get(cache_type)? {
            return Ok(cache);
        }

        let mut caches = self.caches.write();

        // Another caller may have registered it between the two locks
        if let Some(existing) = caches.get(cache_type) {
            return downcast::<C>(cache_type, existing);
        }

        let cache = create()?;
        debug!("Creating cache: {}", cache_type);

        caches.insert(
            cache_type.to_string(),
            CacheEntry {
                cache: Box::new(cache.clone()),
                maintenance: Arc::new(cache.clone()),
                type_id: TypeId::of::<C>(),
                type_name: std::any::type_name::<C>(),
            },
        );

        Ok(cache)
    }

    /// Drop everything every registered cache holds for one shard.
    pub async fn invalidate_shard(&self, shard_id: ShardId) -> Result<()> {
        let caches = self.maintained(|_| true);
        try_join_all(caches.iter().map(|cache| cache.invalidate_shard(shard_id))).await?;
        info!("Invalidated {} caches for shard {}", caches.len(), shard_id);
        Ok(())
    }

    /// Drop one guild from every registered guild-scoped cache.
    pub async fn purge_guild(&self, shard_id: ShardId, guild_id: GuildId) -> Result<()> {
        let caches = self.maintained(|cache| cache.shape() == KeyShape::GuildComposite);
        try_join_all(caches.iter().map(|cache| cache.purge_guild(shard_id, guild_id))).await?;
        info!("Purged guild {} from {} caches", guild_id, caches.len());
        Ok(())
    }

    fn maintained<F>(&self, filter: F) -> Vec<Arc<dyn ShardMaintenance>>
    where
        F: Fn(&dyn ShardMaintenance) -> bool,
    {
        self.caches
            .read()
            .values()
            .filter(|entry| filter(entry.maintenance.as_ref()))
            .map(|entry| Arc::clone(&entry.maintenance))
            .collect()
    }

    /// Check if a cache with the given type exists.
    pub fn contains(&self, cache_type: &str) -> bool {
        self.caches.read().contains_key(cache_type)
    }

    /// Remove a cache from the registry.
    ///
    /// Returns `true` if the cache was removed. Clones already handed out
    /// keep working.
    pub fn remove(&self, cache_type: &str) -> bool {
        let removed = self.caches.write().remove(cache_type).is_some();
        if removed {
            debug!("Removed cache: {}", cache_type);
        }
        removed
    }

    /// Get the number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Get a list of all registered cache types.
    pub fn cache_types(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }
}

fn downcast<C: Clone + 'static>(cache_type: &str, entry: &CacheEntry) -> Result<C> {
    if entry.type_id != TypeId::of::<C>() {
        return Err(CacheError::TypeMismatch {
            cache_type: cache_type.to_string(),
            existing: entry.type_name,
        });
    }

    entry
        .cache
        .downcast_ref::<C>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            cache_type: cache_type.to_string(),
            existing: entry.type_name,
        })
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let caches = self.caches.read();
        f.debug_struct("CacheRegistry")
            .field("cache_count", &caches.len())
            .field("cache_types", &caches.keys().collect::<Vec<_>>())
            .finish()
    }
}
