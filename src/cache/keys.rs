//! Backing-store key layout.
//!
//! Hashes are named `{shard}-{cacheType}` for flat caches and
//! `{shard}-{guild}-{cacheType}` for guild-scoped caches. Each cache type
//! also owns an index set `index:{cacheType}` listing its hashes.

use std::fmt;
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Partition label of the gateway connection that produced an entity.
pub type ShardId = u32;

/// Snowflake id of the guild owning an entity.
pub type GuildId = u64;

/// Namespace tag of one logical collection, e.g. `ROLES`.
///
/// Tags never contain `-` or glob metacharacters so hash identifiers can be
/// parsed back and matched by pattern without ambiguity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheType(Arc<str>);

impl CacheType {
    pub const ROLES: &'static str = "ROLES";
    pub const GUILDS: &'static str = "GUILDS";
    pub const DM_CHANNELS: &'static str = "DM_CHANNELS";
    pub const MEMBERS: &'static str = "MEMBERS";
    pub const USERS: &'static str = "USERS";
    pub const CHANNELS: &'static str = "CHANNELS";
    pub const EMOJIS: &'static str = "EMOJIS";
    pub const VOICE_STATES: &'static str = "VOICE_STATES";

    /// Validate and wrap a cache type tag.
    pub fn new(tag: &str) -> Result<Self> {
        let valid = !tag.is_empty()
            && !tag
                .chars()
                .any(|c| matches!(c, '-' | '*' | '?' | '[' | ']' | '\\') || c.is_whitespace());
        if !valid {
            return Err(CacheError::InvalidCacheType(tag.to_string()));
        }
        Ok(Self(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the index set tracking this type's hashes.
    pub fn index_key(&self) -> String {
        format!("index:{}", self.0)
    }

    /// Pattern matching every hash of this type, flat or guild-scoped.
    pub fn all_pattern(&self) -> String {
        format!("*-{}", self.0)
    }

    /// Pattern matching one guild's hashes across all shards.
    pub fn guild_pattern(&self, guild_id: GuildId) -> String {
        format!("*-{}-{}", guild_id, self.0)
    }

    /// Pattern matching every guild hash of one shard.
    pub fn shard_guilds_pattern(&self, shard_id: ShardId) -> String {
        format!("{}-*-{}", shard_id, self.0)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of one backing-store hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashLocation {
    pub shard_id: ShardId,
    pub guild_id: Option<GuildId>,
}

impl HashLocation {
    pub fn flat(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            guild_id: None,
        }
    }

    pub fn guild(shard_id: ShardId, guild_id: GuildId) -> Self {
        Self {
            shard_id,
            guild_id: Some(guild_id),
        }
    }
}

/// Computed backing-store key of one hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashIdentifier {
    raw: String,
    location: HashLocation,
}

impl HashIdentifier {
    pub fn new(location: HashLocation, cache_type: &CacheType) -> Self {
        let raw = match location.guild_id {
            Some(guild_id) => format!("{}-{}-{}", location.shard_id, guild_id, cache_type),
            None => format!("{}-{}", location.shard_id, cache_type),
        };
        Self { raw, location }
    }

    /// `{shard}-{cacheType}`
    pub fn shard(shard_id: ShardId, cache_type: &CacheType) -> Self {
        Self::new(HashLocation::flat(shard_id), cache_type)
    }

    /// `{shard}-{guild}-{cacheType}`
    pub fn guild(shard_id: ShardId, guild_id: GuildId, cache_type: &CacheType) -> Self {
        Self::new(HashLocation::guild(shard_id, guild_id), cache_type)
    }

    /// Recover the location from a stored key, if it belongs to `cache_type`.
    pub fn parse(raw: &str, cache_type: &CacheType) -> Option<Self> {
        let prefix = raw.strip_suffix(cache_type.as_str())?.strip_suffix('-')?;
        let location = match prefix.split_once('-') {
            Some((shard, guild)) => HashLocation::guild(shard.parse().ok()?, guild.parse().ok()?),
            None => HashLocation::flat(prefix.parse().ok()?),
        };
        Some(Self {
            raw: raw.to_string(),
            location,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn location(&self) -> HashLocation {
        self.location
    }

    pub fn shard_id(&self) -> ShardId {
        self.location.shard_id
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        self.location.guild_id
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}

impl fmt::Display for HashIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Composite lookup key of guild-scoped caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildKey<K> {
    pub guild_id: GuildId,
    pub entity: K,
}

impl<K> GuildKey<K> {
    pub fn new(guild_id: GuildId, entity: K) -> Self {
        Self { guild_id, entity }
    }
}
