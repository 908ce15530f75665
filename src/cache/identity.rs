//! Strategies deriving an entity's logical key.

use std::sync::Arc;

use super::keys::{GuildId, GuildKey};

type IdentifyFn<V, K> = Arc<dyn Fn(&V) -> K + Send + Sync>;
type StringifyFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// How a flat cache identifies entities and names their hash fields.
///
/// Stringified keys must be unique within a cache type across all shards:
/// lookups return the first shard hash containing the field.
pub struct Identity<K, V> {
    identify: IdentifyFn<V, K>,
    stringify: StringifyFn<K>,
}

impl<K, V> Identity<K, V> {
    pub fn new(
        identify: impl Fn(&V) -> K + Send + Sync + 'static,
        stringify: impl Fn(&K) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            identify: Arc::new(identify),
            stringify: Arc::new(stringify),
        }
    }

    pub fn identify(&self, entity: &V) -> K {
        (self.identify)(entity)
    }

    pub fn stringify(&self, key: &K) -> String {
        (self.stringify)(key)
    }
}

impl<K, V> Clone for Identity<K, V> {
    fn clone(&self) -> Self {
        Self {
            identify: Arc::clone(&self.identify),
            stringify: Arc::clone(&self.stringify),
        }
    }
}

/// Identity of guild-scoped entities: the entity key plus its owning guild.
pub struct GuildIdentity<K, V> {
    key: Identity<K, V>,
    identify_guild: IdentifyFn<V, GuildId>,
}

impl<K, V> GuildIdentity<K, V> {
    pub fn new(
        identify: impl Fn(&V) -> K + Send + Sync + 'static,
        stringify_key: impl Fn(&K) -> String + Send + Sync + 'static,
        identify_guild: impl Fn(&V) -> GuildId + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: Identity::new(identify, stringify_key),
            identify_guild: Arc::new(identify_guild),
        }
    }

    /// Composite key of an entity.
    pub fn identify(&self, entity: &V) -> GuildKey<K> {
        GuildKey::new(self.identify_guild(entity), self.key.identify(entity))
    }

    /// Entity key alone, without the guild.
    pub fn identify_key(&self, entity: &V) -> K {
        self.key.identify(entity)
    }

    pub fn identify_guild(&self, entity: &V) -> GuildId {
        (self.identify_guild)(entity)
    }

    /// Hash field name of an entity key. The guild is encoded in the hash.
    pub fn stringify_key(&self, key: &K) -> String {
        self.key.stringify(key)
    }
}

impl<K, V> Clone for GuildIdentity<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            identify_guild: Arc::clone(&self.identify_guild),
        }
    }
}
