//! Constructors for entities keyed by platform snowflakes.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::codec::{EntityCodec, JsonCodec};
use super::identity::{GuildIdentity, Identity};
use super::keys::GuildId;
use super::{CacheConfig, EntityCache, GuildCache};
use crate::error::Result;
use crate::store::HashStore;

/// Entity carrying a 64-bit globally unique id.
pub trait Snowflake {
    fn id(&self) -> u64;
}

/// Entity owned by a guild.
pub trait GuildScoped {
    fn guild_id(&self) -> GuildId;
}

impl<V: Snowflake + 'static> Identity<u64, V> {
    /// Key by snowflake, stored as its decimal string.
    pub fn snowflake() -> Self {
        Identity::new(|entity: &V| entity.id(), |id: &u64| id.to_string())
    }
}

impl<V: Snowflake + GuildScoped + 'static> GuildIdentity<u64, V> {
    pub fn snowflake() -> Self {
        GuildIdentity::new(
            |entity: &V| entity.id(),
            |id: &u64| id.to_string(),
            |entity: &V| entity.guild_id(),
        )
    }
}

impl<V> EntityCache<u64, V>
where
    V: Snowflake + Clone + Send + Sync + 'static,
{
    /// Snowflake-keyed cache with an explicit codec.
    pub fn snowflake_with_codec(
        cache_type: &str,
        store: Arc<dyn HashStore>,
        codec: impl EntityCodec<V>,
        config: &CacheConfig,
    ) -> Result<Self> {
        Self::new(cache_type, store, Identity::snowflake(), codec, config)
    }
}

impl<V> EntityCache<u64, V>
where
    V: Snowflake + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Snowflake-keyed cache storing entities as JSON.
    pub fn snowflake(cache_type: &str, store: Arc<dyn HashStore>, config: &CacheConfig) -> Result<Self> {
        Self::snowflake_with_codec(cache_type, store, JsonCodec::new(), config)
    }
}

impl<V> GuildCache<u64, V>
where
    V: Snowflake + GuildScoped + Clone + Send + Sync + 'static,
{
    /// Snowflake-keyed guild cache with an explicit codec.
    pub fn snowflake_with_codec(
        cache_type: &str,
        store: Arc<dyn HashStore>,
        codec: impl EntityCodec<V>,
        config: &CacheConfig,
    ) -> Result<Self> {
        Self::new(cache_type, store, GuildIdentity::snowflake(), codec, config)
    }
}

impl<V> GuildCache<u64, V>
where
    V: Snowflake + GuildScoped + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Snowflake-keyed guild cache storing entities as JSON.
    pub fn snowflake(cache_type: &str, store: Arc<dyn HashStore>, config: &CacheConfig) -> Result<Self> {
        Self::snowflake_with_codec(cache_type, store, JsonCodec::new(), config)
    }
}
