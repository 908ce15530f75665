//! Cache module - Two-tier sharded entity caches.
//!
//! Every cache keeps a moka local tier in front of a shared hash store.
//! Entities are grouped into one store hash per shard (flat caches) or per
//! shard and guild (guild caches).
//!
//! ## Architecture
//!
//! - `ShardedCache` - The operations every cache offers
//! - `EntityCache` - Flat caches, hash `{shard}-{type}`
//! - `GuildCache` - Guild caches, hash `{shard}-{guild}-{type}`
//! - `CacheRegistry` - One shared cache per cache type, plus shard-wide maintenance
//!
//! ## Usage
//!
//! ```rust,ignore
//! let users: EntityCache<u64, User> = registry.snowflake(CacheType::USERS)?;
//!
//! users.cache(shard_id, user).await?;
//! let user = users.get(&user_id).await?;
//! ```

mod codec;
mod config;
mod contract;
mod engine;
mod entity;
mod guild;
mod identity;
mod keys;
mod registry;
mod snowflake;
mod typed;

pub use codec::{EntityCodec, FnCodec, JsonCodec};
pub use config::{CacheConfig, KeyDiscovery};
pub use contract::{ShardMaintenance, ShardedCache};
pub use engine::KeyShape;
pub use entity::EntityCache;
pub use guild::GuildCache;
pub use identity::{GuildIdentity, Identity};
pub use keys::{CacheType, GuildId, GuildKey, HashIdentifier, HashLocation, ShardId};
pub use registry::CacheRegistry;
pub use snowflake::{GuildScoped, Snowflake};
pub use typed::LocalCache;
