//! Two-tier engine shared by flat and guild-scoped caches.
//!
//! Writes go to the backing store first and then refresh the local tier.
//! Reads consult the local tier and fall back to a single-flight load that
//! searches the candidate hashes in ascending shard order.

use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::try_join_all;
use tracing::debug;

use super::codec::EntityCodec;
use super::keys::{CacheType, GuildId, HashIdentifier, HashLocation, ShardId};
use super::{CacheConfig, KeyDiscovery, LocalCache};
use crate::error::{CacheError, Result};
use crate::store::HashStore;

/// Stringifies a local key into the hash field it is stored under.
pub(crate) type FieldFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Layout of the hashes a cache writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// `{shard}-{cacheType}`
    Flat,
    /// `{shard}-{guild}-{cacheType}`
    GuildComposite,
}

/// Local entry; remembers the shard so shard invalidation can be precise.
#[derive(Clone)]
pub(crate) struct Cached<V> {
    pub shard_id: ShardId,
    pub entity: V,
}

/// An entity read back from a store hash.
pub(crate) struct Stored<V> {
    pub location: HashLocation,
    pub field: String,
    pub entity: V,
}

/// Narrows hash discovery to a shard and/or guild.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HashFilter {
    pub shard_id: Option<ShardId>,
    pub guild_id: Option<GuildId>,
}

impl HashFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn shard(shard_id: ShardId) -> Self {
        Self {
            shard_id: Some(shard_id),
            guild_id: None,
        }
    }

    pub fn guild(guild_id: GuildId) -> Self {
        Self {
            shard_id: None,
            guild_id: Some(guild_id),
        }
    }
}

/// Stripes of the mutation clock. Keys sharing a stripe only cost each
/// other an extra reload.
const CLOCK_STRIPES: usize = 64;

/// Per-key mutation counters, striped to bound memory.
///
/// A load records its key's tick before reading the store. If the tick
/// moved by the time the loaded entry lands locally, a write or delete
/// raced the load and the entry is dropped.
struct MutationClock {
    hasher: RandomState,
    stripes: Box<[AtomicU64]>,
}

impl MutationClock {
    fn new() -> Self {
        Self {
            hasher: RandomState::new(),
            stripes: (0..CLOCK_STRIPES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn stripe<K: Hash>(&self, key: &K) -> &AtomicU64 {
        let slot = self.hasher.hash_one(key) as usize % self.stripes.len();
        &self.stripes[slot]
    }

    fn read<K: Hash>(&self, key: &K) -> u64 {
        self.stripe(key).load(Ordering::Acquire)
    }

    fn tick<K: Hash>(&self, key: &K) {
        self.stripe(key).fetch_add(1, Ordering::AcqRel);
    }

    fn tick_all(&self) {
        for stripe in self.stripes.iter() {
            stripe.fetch_add(1, Ordering::AcqRel);
        }
    }
}

pub(crate) struct Engine<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache_type: CacheType,
    index: String,
    shape: KeyShape,
    field_of: FieldFn<K>,
    codec: Arc<dyn EntityCodec<V>>,
    store: Arc<dyn HashStore>,
    local: LocalCache<K, Cached<V>>,
    clock: MutationClock,
    discovery: KeyDiscovery,
}

impl<K, V> Engine<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        cache_type: CacheType,
        shape: KeyShape,
        field_of: FieldFn<K>,
        codec: Arc<dyn EntityCodec<V>>,
        store: Arc<dyn HashStore>,
        config: &CacheConfig,
    ) -> Self {
        let local = LocalCache::new(cache_type.as_str(), config);
        Self {
            index: cache_type.index_key(),
            cache_type,
            shape,
            field_of,
            codec,
            store,
            local,
            clock: MutationClock::new(),
            discovery: config.discovery,
        }
    }

    pub fn cache_type(&self) -> &CacheType {
        &self.cache_type
    }

    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    pub fn field(&self, key: &K) -> String {
        (self.field_of)(key)
    }

    pub fn locate(&self, location: HashLocation) -> HashIdentifier {
        HashIdentifier::new(location, &self.cache_type)
    }

    fn encode(&self, entity: &V) -> Result<Vec<u8>> {
        self.codec.encode(entity).map_err(|source| CacheError::Encode {
            cache_type: self.cache_type.to_string(),
            source,
        })
    }

    fn decode(&self, field: &str, bytes: &[u8]) -> Result<V> {
        self.codec.decode(bytes).map_err(|source| CacheError::Decode {
            cache_type: self.cache_type.to_string(),
            field: field.to_string(),
            source,
        })
    }

    /// Store one entity and refresh its local entry.
    pub async fn write(&self, location: HashLocation, key: K, entity: V) -> Result<()> {
        let hash = self.locate(location);
        let field = self.field(&key);
        let bytes = self.encode(&entity)?;

        self.store.hset(&self.index, hash.as_str(), &field, bytes).await?;
        self.clock.tick(&key);
        debug!("[Cached] {} '{}' in {}", self.cache_type, field, hash);

        self.local
            .insert(
                key,
                Cached {
                    shard_id: location.shard_id,
                    entity,
                },
            )
            .await;
        Ok(())
    }

    /// Store a batch into one hash with a single store call.
    ///
    /// Encoding happens up front, so an unencodable entity aborts the batch
    /// before anything is written.
    pub async fn write_many(&self, location: HashLocation, entries: Vec<(K, V)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let hash = self.locate(location);
        let fields = entries
            .iter()
            .map(|(key, entity)| -> Result<(String, Vec<u8>)> {
                Ok((self.field(key), self.encode(entity)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let count = fields.len();

        self.store.hset_many(&self.index, hash.as_str(), fields).await?;
        debug!("[Cached] {} {} entities in {}", count, self.cache_type, hash);

        for (key, entity) in entries {
            self.clock.tick(&key);
            self.local
                .insert(
                    key,
                    Cached {
                        shard_id: location.shard_id,
                        entity,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Look an entity up, loading it from the store on a local miss.
    pub async fn read(&self, key: &K, filter: HashFilter) -> Result<Option<V>> {
        let seen = self.clock.read(key);
        let loaded = self
            .local
            .get_or_try_insert_with(key.clone(), self.fetch(key, filter))
            .await;

        match loaded {
            Ok(cached) => {
                if self.clock.read(key) != seen {
                    // Possibly loaded before a concurrent mutation; reload next time
                    self.local.invalidate(key).await;
                }
                Ok(Some(cached.entity))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(CacheError::Shared(e)),
        }
    }

    /// Look an entity up in the store only, then resync the local entry.
    pub async fn read_fresh(&self, key: &K, filter: HashFilter) -> Result<Option<V>> {
        let seen = self.clock.read(key);
        match self.fetch(key, filter).await {
            Ok(cached) => {
                let entity = cached.entity.clone();
                self.local.insert(key.clone(), cached).await;
                if self.clock.read(key) != seen {
                    self.local.invalidate(key).await;
                }
                Ok(Some(entity))
            }
            Err(e) if e.is_not_found() => {
                self.local.invalidate(key).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, key: &K, filter: HashFilter) -> Result<Cached<V>> {
        let field = self.field(key);

        for hash in self.discover(filter).await? {
            if let Some(bytes) = self.store.hget(hash.as_str(), &field).await? {
                let entity = self.decode(&field, &bytes)?;
                return Ok(Cached {
                    shard_id: hash.shard_id(),
                    entity,
                });
            }
        }

        debug!("[Miss] {} '{}' not in backing store", self.cache_type, field);
        Err(CacheError::NotFound {
            cache_type: self.cache_type.to_string(),
            field,
        })
    }

    /// Every stored entity in the matching hashes, with where it was found.
    pub async fn read_all(&self, filter: HashFilter) -> Result<Vec<Stored<V>>> {
        let hashes = self.discover(filter).await?;
        let contents = try_join_all(hashes.iter().map(|hash| self.store.hgetall(hash.as_str()))).await?;

        let mut entries = Vec::new();
        for (hash, fields) in hashes.iter().zip(contents) {
            for (field, bytes) in fields {
                let entity = self.decode(&field, &bytes)?;
                entries.push(Stored {
                    location: hash.location(),
                    field,
                    entity,
                });
            }
        }
        Ok(entries)
    }

    /// Remove one field and its local entry.
    pub async fn remove(&self, location: HashLocation, key: &K) -> Result<()> {
        let hash = self.locate(location);
        let field = self.field(key);

        self.store.hdel(&self.index, hash.as_str(), &field).await?;
        self.clock.tick(key);
        self.local.invalidate(key).await;

        debug!("[Deleted] {} '{}' from {}", self.cache_type, field, hash);
        Ok(())
    }

    /// Delete whole hashes from the store and the index.
    pub async fn drop_hashes(&self, hashes: &[HashIdentifier]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let raw: Vec<String> = hashes.iter().map(|hash| hash.as_str().to_string()).collect();
        self.store.del(&self.index, &raw).await?;
        self.clock.tick_all();

        debug!("[Deleted] {} hashes: {:?}", self.cache_type, raw);
        Ok(())
    }

    /// Evict local entries matching `predicate`, given the key and the
    /// shard the entry was cached from.
    pub fn evict_if<F>(&self, predicate: F)
    where
        F: Fn(&K, ShardId) -> bool + Send + Sync + 'static,
    {
        self.local
            .invalidate_if(move |key, cached| predicate(key, cached.shard_id));
    }

    /// Hashes of this cache's shape that pass `filter`, in shard order.
    pub async fn discover(&self, filter: HashFilter) -> Result<Vec<HashIdentifier>> {
        let raw = match self.discovery {
            KeyDiscovery::Index => self.store.members(&self.index).await?,
            KeyDiscovery::Scan => self.store.scan(&self.pattern(filter)).await?,
        };

        let mut hashes: Vec<HashIdentifier> = raw
            .iter()
            .filter_map(|raw| HashIdentifier::parse(raw, &self.cache_type))
            .filter(|hash| self.accepts(hash, filter))
            .collect();
        hashes.sort_by_key(HashIdentifier::location);
        hashes.dedup();
        Ok(hashes)
    }

    fn accepts(&self, hash: &HashIdentifier, filter: HashFilter) -> bool {
        let shape_matches = match self.shape {
            KeyShape::Flat => hash.guild_id().is_none(),
            KeyShape::GuildComposite => hash.guild_id().is_some(),
        };

        shape_matches
            && filter.shard_id.is_none_or(|shard_id| shard_id == hash.shard_id())
            && filter.guild_id.is_none_or(|guild_id| Some(guild_id) == hash.guild_id())
    }

    fn pattern(&self, filter: HashFilter) -> String {
        let cache_type = &self.cache_type;
        match (self.shape, filter.shard_id, filter.guild_id) {
            (KeyShape::Flat, Some(shard_id), _) => {
                HashIdentifier::shard(shard_id, cache_type).into_string()
            }
            (KeyShape::GuildComposite, Some(shard_id), Some(guild_id)) => {
                HashIdentifier::guild(shard_id, guild_id, cache_type).into_string()
            }
            (KeyShape::GuildComposite, Some(shard_id), None) => {
                cache_type.shard_guilds_pattern(shard_id)
            }
            (KeyShape::GuildComposite, None, Some(guild_id)) => cache_type.guild_pattern(guild_id),
            _ => cache_type.all_pattern(),
        }
    }

    pub fn local_entry_count(&self) -> u64 {
        self.local.entry_count()
    }

    /// Apply pending local evictions.
    pub async fn sync_local(&self) {
        self.local.sync().await;
    }
}
