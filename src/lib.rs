//! shardcache - Two-tier sharded entity cache for chat-platform gateways.
//!
//! Entities received by gateway shards are kept in a moka local tier in
//! front of Redis hashes that every process of the deployment shares.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `store` - Backing store client (Redis, in-memory)
//! - `cache` - Entity caches, key layout and registry
//! - `events` - Applies origin events to caches
//! - `error` - Error taxonomy

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod store;

pub use cache::{
    CacheConfig, CacheRegistry, CacheType, EntityCache, GuildCache, GuildKey, ShardMaintenance,
    ShardedCache,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use events::EntityEvent;
pub use store::{HashStore, MemoryStore, RedisStore, StoreConfig};
