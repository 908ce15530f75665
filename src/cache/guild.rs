//! Guild-scoped entity cache keyed by `{shard}-{guild}-{cacheType}` hashes.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use super::codec::EntityCodec;
use super::contract::{ShardMaintenance, ShardedCache};
use super::engine::{Engine, HashFilter, KeyShape};
use super::identity::GuildIdentity;
use super::keys::{CacheType, GuildId, GuildKey, HashIdentifier, HashLocation, ShardId};
use super::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::HashStore;

/// Two-tier cache for entities owned by a guild, such as members or roles.
///
/// Lookups use [`GuildKey`]; the guild selects the hashes searched and the
/// entity key names the field. Reads go through the local tier exactly
/// like [`EntityCache`](super::EntityCache).
pub struct GuildCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    engine: Arc<Engine<GuildKey<K>, V>>,
    identity: GuildIdentity<K, V>,
}

impl<K, V> Clone for GuildCache<K, V>
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

impl<K, V> GuildCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a guild-scoped cache for `cache_type`.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidCacheType`] for unusable tags.
    pub fn new(
        cache_type: &str,
        store: Arc<dyn HashStore>,
        identity: GuildIdentity<K, V>,
        codec: impl EntityCodec<V>,
        config: &CacheConfig,
    ) -> Result<Self> {
        let cache_type = CacheType::new(cache_type)?;
        let field_of = {
            let identity = identity.clone();
            Arc::new(move |key: &GuildKey<K>| identity.stringify_key(&key.entity))
        };

        let engine = Engine::new(
            cache_type,
            KeyShape::GuildComposite,
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

    /// `{shard}-{guild}-{cacheType}`
    pub fn hash_identifier(&self, shard_id: ShardId, guild_id: GuildId) -> HashIdentifier {
        self.engine.locate(HashLocation::guild(shard_id, guild_id))
    }

    /// Store an entity in an explicit guild's hash.
    pub async fn cache_in_guild(&self, guild_id: GuildId, shard_id: ShardId, entity: V) -> Result<()> {
        let key = GuildKey::new(guild_id, self.identity.identify_key(&entity));
        self.engine
            .write(HashLocation::guild(shard_id, guild_id), key, entity)
            .await
    }

    /// Store many entities into one guild's hash with a single store call.
    pub async fn bulk_cache_in_guild(
        &self,
        guild_id: GuildId,
        shard_id: ShardId,
        entities: Vec<V>,
    ) -> Result<()> {
        let entries = entities
            .into_iter()
            .map(|entity| {
                let key = GuildKey::new(guild_id, self.identity.identify_key(&entity));
                (key, entity)
            })
            .collect();
        self.engine
            .write_many(HashLocation::guild(shard_id, guild_id), entries)
            .await
    }

    /// Look an entity up by guild and entity key.
    pub async fn get_in_guild(&self, guild_id: GuildId, key: K) -> Result<Option<V>> {
        self.get(&GuildKey::new(guild_id, key)).await
    }

    /// Look an entity up in the backing store, skipping the local tier.
    pub async fn get_fresh(&self, key: &GuildKey<K>) -> Result<Option<V>> {
        self.engine
            .read_fresh(key, HashFilter::guild(key.guild_id))
            .await
    }

    /// Remove one entity from one guild's hash.
    pub async fn delete_in_guild(&self, shard_id: ShardId, guild_id: GuildId, key: &K) -> Result<()> {
        let key = GuildKey::new(guild_id, key.clone());
        self.engine
            .remove(HashLocation::guild(shard_id, guild_id), &key)
            .await
    }

    /// Remove a guild's whole hash for one shard, e.g. when the bot leaves.
    pub async fn delete_guild(&self, shard_id: ShardId, guild_id: GuildId) -> Result<()> {
        let hash = self.hash_identifier(shard_id, guild_id);
        self.engine.drop_hashes(std::slice::from_ref(&hash)).await?;
        self.engine.evict_if(move |key, cached_shard| {
            key.guild_id == guild_id && cached_shard == shard_id
        });

        info!("Removed {} of guild {} on shard {}", self.engine.cache_type(), guild_id, shard_id);
        Ok(())
    }

    /// Every entity of one guild across all shards.
    pub async fn get_all_in_guild(&self, guild_id: GuildId) -> Result<Vec<V>> {
        let entries = self.engine.read_all(HashFilter::guild(guild_id)).await?;
        Ok(entries.into_iter().map(|stored| stored.entity).collect())
    }

    /// [`get_all_in_guild`](Self::get_all_in_guild) keyed by field name.
    pub async fn guild_view(&self, guild_id: GuildId) -> Result<HashMap<String, V>> {
        Ok(self
            .engine
            .read_all(HashFilter::guild(guild_id))
            .await?
            .into_iter()
            .map(|stored| (stored.field, stored.entity))
            .collect())
    }

    /// One guild's entities keyed by a caller-chosen name, e.g. role name.
    ///
    /// Entities with the same name collapse into one entry.
    pub async fn guild_named_view(
        &self,
        guild_id: GuildId,
        name: &(dyn Fn(&V) -> String + Send + Sync),
    ) -> Result<HashMap<String, V>> {
        Ok(self
            .get_all_in_guild(guild_id)
            .await?
            .into_iter()
            .map(|entity| (name(&entity), entity))
            .collect())
    }

    /// Cache an entity on the runtime's worker pool.
    pub fn spawn_cache(&self, shard_id: ShardId, entity: V) -> JoinHandle<Result<()>> {
        let cache = self.clone();
        tokio::spawn(async move { cache.cache(shard_id, entity).await })
    }

    /// Delete an entity on the runtime's worker pool.
    pub fn spawn_delete(&self, shard_id: ShardId, guild_id: GuildId, key: K) -> JoinHandle<Result<()>> {
        let cache = self.clone();
        tokio::spawn(async move { cache.delete_in_guild(shard_id, guild_id, &key).await })
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
impl<K, V> ShardedCache<GuildKey<K>, V> for GuildCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cache_type(&self) -> &CacheType {
        self.engine.cache_type()
    }

    fn identify(&self, entity: &V) -> GuildKey<K> {
        self.identity.identify(entity)
    }

    fn stringify(&self, key: &GuildKey<K>) -> String {
        self.identity.stringify_key(&key.entity)
    }

    /// A shard alone does not name a hash here.
    fn format_hash_identifier(&self, _shard_id: ShardId) -> Result<HashIdentifier> {
        Err(CacheError::Unsupported {
            operation: "format_hash_identifier",
        })
    }

    async fn cache_with_key(&self, shard_id: ShardId, key: GuildKey<K>, entity: V) -> Result<()> {
        let location = HashLocation::guild(shard_id, key.guild_id);
        self.engine.write(location, key, entity).await
    }

    async fn bulk_cache(&self, shard_id: ShardId, entities: Vec<V>) -> Result<()> {
        let mut by_guild: BTreeMap<GuildId, Vec<V>> = BTreeMap::new();
        for entity in entities {
            by_guild
                .entry(self.identity.identify_guild(&entity))
                .or_default()
                .push(entity);
        }

        for (guild_id, entities) in by_guild {
            self.bulk_cache_in_guild(guild_id, shard_id, entities).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &GuildKey<K>) -> Result<Option<V>> {
        self.engine.read(key, HashFilter::guild(key.guild_id)).await
    }

    async fn delete(&self, shard_id: ShardId, key: &GuildKey<K>) -> Result<()> {
        let location = HashLocation::guild(shard_id, key.guild_id);
        self.engine.remove(location, key).await
    }

    async fn get_all(&self) -> Result<Vec<V>> {
        let entries = self.engine.read_all(HashFilter::any()).await?;
        Ok(entries.into_iter().map(|stored| stored.entity).collect())
    }

    /// Keyed by `{guild}-{key}`; the same key may exist in several guilds.
    async fn as_view(&self) -> Result<HashMap<String, V>> {
        let entries = self.engine.read_all(HashFilter::any()).await?;
        Ok(entries
            .into_iter()
            .map(|stored| {
                let name = match stored.location.guild_id {
                    Some(guild_id) => format!("{}-{}", guild_id, stored.field),
                    None => stored.field,
                };
                (name, stored.entity)
            })
            .collect())
    }

    /// Delete every guild hash of the shard.
    async fn invalidate(&self, shard_id: ShardId) -> Result<()> {
        let hashes = self.engine.discover(HashFilter::shard(shard_id)).await?;
        self.engine.drop_hashes(&hashes).await?;
        self.engine.evict_if(move |_, cached_shard| cached_shard == shard_id);

        info!(
            "Invalidated {} guild hashes of {} for shard {}",
            hashes.len(),
            self.engine.cache_type(),
            shard_id
        );
        Ok(())
    }

    /// A bare update cannot tell which guild hash to write.
    async fn update(&self, _shard_id: ShardId, _key: GuildKey<K>, _entity: V) -> Result<()> {
        Err(CacheError::Unsupported { operation: "update" })
    }
}

#[async_trait]
impl<K, V> ShardMaintenance for GuildCache<K, V>
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

    async fn purge_guild(&self, shard_id: ShardId, guild_id: GuildId) -> Result<()> {
        self.delete_guild(shard_id, guild_id).await
    }
}

impl<K, V> std::fmt::Debug for GuildCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildCache")
            .field("cache_type", self.engine.cache_type())
            .field("local_entries", &self.engine.local_entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{JsonCodec, KeyDiscovery};
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        guild_id: u64,
        user: String,
        nick: Option<String>,
    }

    fn member(guild_id: u64, user: &str) -> Member {
        Member {
            guild_id,
            user: user.to_string(),
            nick: None,
        }
    }

    fn members_cache(store: &MemoryStore) -> GuildCache<String, Member> {
        GuildCache::new(
            CacheType::MEMBERS,
            Arc::new(store.clone()),
            GuildIdentity::new(
                |m: &Member| m.user.clone(),
                |user: &String| user.clone(),
                |m: &Member| m.guild_id,
            ),
            JsonCodec::new(),
            &CacheConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_same_key_in_two_guilds() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache.cache(0, member(100, "userA")).await.unwrap();
        cache.cache(0, member(200, "userA")).await.unwrap();

        assert!(store.contains_hash("0-100-MEMBERS"));
        assert!(store.contains_hash("0-200-MEMBERS"));
        assert_eq!(cache.get_all_in_guild(100).await.unwrap(), vec![member(100, "userA")]);
        assert_eq!(
            cache.get_in_guild(200, "userA".to_string()).await.unwrap(),
            Some(member(200, "userA"))
        );
        assert_eq!(cache.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_view_keeps_same_key_from_each_guild() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache.cache(0, member(100, "userA")).await.unwrap();
        cache.cache(1, member(200, "userA")).await.unwrap();

        let view = cache.as_view().await.unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view["100-userA"], member(100, "userA"));
        assert_eq!(view["200-userA"], member(200, "userA"));
    }

    #[tokio::test]
    async fn test_named_views() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        let mut nicked = member(100, "a");
        nicked.nick = Some("Alice".to_string());
        cache.cache(0, nicked.clone()).await.unwrap();
        cache.cache(0, member(100, "b")).await.unwrap();
        cache.cache(0, member(200, "c")).await.unwrap();

        let display_name = |m: &Member| m.nick.clone().unwrap_or_else(|| m.user.clone());

        let guild = cache.guild_named_view(100, &display_name).await.unwrap();
        assert_eq!(guild.len(), 2);
        assert_eq!(guild["Alice"], nicked);
        assert_eq!(guild["b"], member(100, "b"));

        let all = cache.as_named_view(&display_name).await.unwrap();
        let mut names: Vec<_> = all.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["Alice", "b", "c"]);
    }

    #[tokio::test]
    async fn test_get_all_in_guild_unions_shards() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache
            .bulk_cache_in_guild(100, 0, vec![member(100, "a"), member(100, "b")])
            .await
            .unwrap();
        cache.cache_in_guild(100, 1, member(100, "c")).await.unwrap();
        cache.cache_in_guild(300, 1, member(300, "d")).await.unwrap();

        let view = cache.guild_view(100).await.unwrap();
        let mut users: Vec<_> = view.keys().cloned().collect();
        users.sort();
        assert_eq!(users, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_bulk_cache_groups_by_guild() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache
            .bulk_cache(2, vec![member(100, "a"), member(200, "b"), member(100, "c")])
            .await
            .unwrap();

        assert_eq!(cache.get_all_in_guild(100).await.unwrap().len(), 2);
        assert_eq!(cache.get_all_in_guild(200).await.unwrap(), vec![member(200, "b")]);
        assert!(!store.contains_hash("2-MEMBERS"));
    }

    #[tokio::test]
    async fn test_invalidate_removes_every_guild_of_shard() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache.cache(0, member(100, "a")).await.unwrap();
        cache.cache(0, member(200, "b")).await.unwrap();
        cache.cache(1, member(100, "c")).await.unwrap();

        cache.invalidate(0).await.unwrap();
        cache.sync_local().await;

        assert_eq!(cache.get_in_guild(100, "a".to_string()).await.unwrap(), None);
        assert_eq!(cache.get_in_guild(200, "b".to_string()).await.unwrap(), None);
        assert_eq!(
            cache.get_in_guild(100, "c".to_string()).await.unwrap(),
            Some(member(100, "c"))
        );
        assert_eq!(store.hash_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_guild_and_delete_entity() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache.cache(0, member(100, "a")).await.unwrap();
        cache.cache(0, member(100, "b")).await.unwrap();
        cache.cache(0, member(200, "a")).await.unwrap();

        cache.delete_in_guild(0, 100, &"a".to_string()).await.unwrap();
        assert_eq!(cache.get_in_guild(100, "a".to_string()).await.unwrap(), None);
        assert!(cache.get_in_guild(100, "b".to_string()).await.unwrap().is_some());

        cache.delete_guild(0, 100).await.unwrap();
        cache.sync_local().await;
        assert_eq!(cache.get_in_guild(100, "b".to_string()).await.unwrap(), None);
        assert!(cache.get_in_guild(200, "a".to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_emptied_guild_hash_leaves_index() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        cache.cache(0, member(100, "a")).await.unwrap();
        cache.cache(0, member(200, "b")).await.unwrap();

        cache.delete_in_guild(0, 100, &"a".to_string()).await.unwrap();

        assert_eq!(
            store.members("index:MEMBERS").await.unwrap(),
            vec!["0-200-MEMBERS".to_string()]
        );
        assert_eq!(cache.get_in_guild(100, "a".to_string()).await.unwrap(), None);
    }

    fn scanning_members_cache(store: &MemoryStore) -> GuildCache<String, Member> {
        GuildCache::new(
            CacheType::MEMBERS,
            Arc::new(store.clone()),
            GuildIdentity::new(
                |m: &Member| m.user.clone(),
                |user: &String| user.clone(),
                |m: &Member| m.guild_id,
            ),
            JsonCodec::new(),
            &CacheConfig::default().discovery(KeyDiscovery::Scan),
        )
        .unwrap()
    }

    /// Writes straight into a hash without touching the index.
    async fn seed_unindexed(store: &MemoryStore, hash: &str, m: &Member) {
        let bytes = serde_json::to_vec(m).unwrap();
        store.hset("unused", hash, &m.user, bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_discovery_reads_guild_hashes() {
        let store = MemoryStore::new();
        seed_unindexed(&store, "0-100-MEMBERS", &member(100, "a")).await;
        seed_unindexed(&store, "3-100-MEMBERS", &member(100, "b")).await;
        seed_unindexed(&store, "0-1100-MEMBERS", &member(1100, "a")).await;
        seed_unindexed(&store, "0-100-ROLES", &member(100, "z")).await;

        let cache = scanning_members_cache(&store);

        let mut users: Vec<_> = cache
            .get_all_in_guild(100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.user)
            .collect();
        users.sort();
        assert_eq!(users, vec!["a", "b"]);

        assert_eq!(
            cache.get_in_guild(1100, "a".to_string()).await.unwrap(),
            Some(member(1100, "a"))
        );
        assert_eq!(cache.get_in_guild(100, "z".to_string()).await.unwrap(), None);
        assert_eq!(cache.get_in_guild(1100, "b".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_discovery_invalidates_one_shard() {
        let store = MemoryStore::new();
        seed_unindexed(&store, "1-100-MEMBERS", &member(100, "a")).await;
        seed_unindexed(&store, "1-1100-MEMBERS", &member(1100, "b")).await;
        seed_unindexed(&store, "11-100-MEMBERS", &member(100, "c")).await;
        seed_unindexed(&store, "1-ROLES", &member(0, "d")).await;

        let cache = scanning_members_cache(&store);
        cache.invalidate(1).await.unwrap();

        assert!(!store.contains_hash("1-100-MEMBERS"));
        assert!(!store.contains_hash("1-1100-MEMBERS"));
        assert!(store.contains_hash("11-100-MEMBERS"));
        assert!(store.contains_hash("1-ROLES"));
        assert_eq!(
            cache.get_in_guild(100, "c".to_string()).await.unwrap(),
            Some(member(100, "c"))
        );
    }

    #[tokio::test]
    async fn test_single_dimension_operations_are_unsupported() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);

        let err = cache.format_hash_identifier(0).unwrap_err();
        assert!(matches!(err, CacheError::Unsupported { .. }));

        let key = GuildKey::new(100, "a".to_string());
        let err = cache.update(0, key, member(100, "a")).await.unwrap_err();
        assert!(matches!(err, CacheError::Unsupported { operation: "update" }));
        assert_eq!(store.hash_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_read_bypasses_local_tier() {
        let store = MemoryStore::new();
        let cache = members_cache(&store);
        let key = GuildKey::new(100, "a".to_string());

        cache.cache(0, member(100, "a")).await.unwrap();
        store.hdel("index:MEMBERS", "0-100-MEMBERS", "a").await.unwrap();

        // Local tier still holds the entry until a fresh read
        assert!(cache.get(&key).await.unwrap().is_some());
        assert_eq!(cache.get_fresh(&key).await.unwrap(), None);
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }
}
