//! Event handler system.
//!
//! The gateway side turns platform events into [`EntityEvent`]s and feeds
//! them to a cache, either inline with [`apply`] or through a channel
//! drained by [`consume`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{GuildId, KeyShape, ShardId, ShardMaintenance, ShardedCache};
use crate::error::Result;

/// A change observed by the origin.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent<K, V> {
    /// Entity created or updated.
    Upsert { shard_id: ShardId, entity: V },
    /// Initial snapshot, e.g. a guild becoming available.
    BulkUpsert { shard_id: ShardId, entities: Vec<V> },
    Delete { shard_id: ShardId, key: K },
    /// The bot left a guild, or the guild became unavailable.
    GuildRemoved { shard_id: ShardId, guild_id: GuildId },
    /// Shard reconnected; everything it cached is stale.
    ShardResync { shard_id: ShardId },
}

impl<K, V> EntityEvent<K, V> {
    pub fn shard_id(&self) -> ShardId {
        match self {
            Self::Upsert { shard_id, .. }
            | Self::BulkUpsert { shard_id, .. }
            | Self::Delete { shard_id, .. }
            | Self::GuildRemoved { shard_id, .. }
            | Self::ShardResync { shard_id } => *shard_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::BulkUpsert { .. } => "bulk_upsert",
            Self::Delete { .. } => "delete",
            Self::GuildRemoved { .. } => "guild_removed",
            Self::ShardResync { .. } => "shard_resync",
        }
    }
}

/// Apply one event to a cache.
///
/// `GuildRemoved` is ignored by flat caches.
pub async fn apply<K, V, C>(cache: &C, event: EntityEvent<K, V>) -> Result<()>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: ShardedCache<K, V> + ShardMaintenance + ?Sized,
{
    match event {
        EntityEvent::Upsert { shard_id, entity } => cache.cache(shard_id, entity).await,
        EntityEvent::BulkUpsert { shard_id, entities } => {
            if entities.is_empty() {
                return Ok(());
            }
            cache.bulk_cache(shard_id, entities).await
        }
        EntityEvent::Delete { shard_id, key } => cache.delete(shard_id, &key).await,
        EntityEvent::GuildRemoved { shard_id, guild_id } => match cache.shape() {
            KeyShape::GuildComposite => cache.purge_guild(shard_id, guild_id).await,
            KeyShape::Flat => {
                debug!(
                    "Ignoring guild {} removal for flat cache {}",
                    guild_id,
                    ShardMaintenance::cache_type(cache)
                );
                Ok(())
            }
        },
        EntityEvent::ShardResync { shard_id } => cache.invalidate(shard_id).await,
    }
}

/// Drain `events` into `cache` on a background task.
///
/// A failed event is logged and skipped; the task ends when every sender
/// is dropped.
pub fn consume<K, V, C>(cache: C, mut events: mpsc::Receiver<EntityEvent<K, V>>) -> JoinHandle<()>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: ShardedCache<K, V> + ShardMaintenance + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let shard_id = event.shard_id();
            let name = event.name();

            if let Err(e) = apply(&cache, event).await {
                warn!(
                    "Failed to apply {} event for {} on shard {}: {}",
                    name,
                    ShardMaintenance::cache_type(&cache),
                    shard_id,
                    e
                );
            }
        }
        debug!("Event channel closed for {}", ShardMaintenance::cache_type(&cache));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        CacheConfig, CacheType, EntityCache, EntityCodec, FnCodec, GuildCache, GuildKey, GuildScoped, Snowflake,
    };
    use crate::error::CodecError;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Emoji {
        id: u64,
        guild_id: u64,
        name: String,
    }

    impl Snowflake for Emoji {
        fn id(&self) -> u64 {
            self.id
        }
    }

    impl GuildScoped for Emoji {
        fn guild_id(&self) -> GuildId {
            self.guild_id
        }
    }

    fn emoji(id: u64, guild_id: u64) -> Emoji {
        Emoji {
            id,
            guild_id,
            name: format!("emoji_{id}"),
        }
    }

    fn guild_cache(store: &MemoryStore) -> GuildCache<u64, Emoji> {
        GuildCache::snowflake(CacheType::EMOJIS, Arc::new(store.clone()), &CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_apply_guild_events() {
        let store = MemoryStore::new();
        let cache = guild_cache(&store);

        let snapshot = EntityEvent::BulkUpsert {
            shard_id: 0,
            entities: vec![emoji(1, 10), emoji(2, 10), emoji(3, 20)],
        };
        apply(&cache, snapshot).await.unwrap();
        assert!(store.contains_hash("0-10-EMOJIS"));
        assert!(store.contains_hash("0-20-EMOJIS"));

        let delete = EntityEvent::Delete {
            shard_id: 0,
            key: GuildKey::new(10, 1),
        };
        apply(&cache, delete).await.unwrap();
        assert_eq!(cache.get(&GuildKey::new(10, 1)).await.unwrap(), None);

        let removed = EntityEvent::GuildRemoved {
            shard_id: 0,
            guild_id: 10,
        };
        apply(&cache, removed).await.unwrap();
        assert!(!store.contains_hash("0-10-EMOJIS"));
        assert_eq!(cache.get(&GuildKey::new(10, 2)).await.unwrap(), None);
        assert_eq!(cache.get(&GuildKey::new(20, 3)).await.unwrap(), Some(emoji(3, 20)));
    }

    #[tokio::test]
    async fn test_guild_removed_is_ignored_by_flat_cache() {
        let store = MemoryStore::new();
        let cache: EntityCache<u64, Emoji> =
            EntityCache::snowflake(CacheType::USERS, Arc::new(store.clone()), &CacheConfig::default()).unwrap();

        apply(&cache, EntityEvent::Upsert { shard_id: 1, entity: emoji(5, 10) })
            .await
            .unwrap();
        apply(&cache, EntityEvent::GuildRemoved { shard_id: 1, guild_id: 10 })
            .await
            .unwrap();

        assert_eq!(cache.get(&5).await.unwrap(), Some(emoji(5, 10)));
    }

    /// JSON codec that refuses to encode emojis named "broken".
    fn picky_codec() -> impl EntityCodec<Emoji> {
        FnCodec::new(
            |emoji: &Emoji| -> Result<Vec<u8>, CodecError> {
                if emoji.name == "broken" {
                    return Err(CodecError::Invalid("unencodable emoji".to_string()));
                }
                Ok(serde_json::to_vec(emoji)?)
            },
            |bytes: &[u8]| -> Result<Emoji, CodecError> { Ok(serde_json::from_slice(bytes)?) },
        )
    }

    #[tokio::test]
    async fn test_consume_skips_failures_and_stops_on_close() {
        let store = MemoryStore::new();
        let cache: GuildCache<u64, Emoji> = GuildCache::snowflake_with_codec(
            CacheType::EMOJIS,
            Arc::new(store.clone()),
            picky_codec(),
            &CacheConfig::default(),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = consume(cache.clone(), rx);

        let mut broken = emoji(1, 10);
        broken.name = "broken".to_string();

        tx.send(EntityEvent::Upsert { shard_id: 0, entity: broken.clone() })
            .await
            .unwrap();
        tx.send(EntityEvent::BulkUpsert {
            shard_id: 0,
            entities: vec![emoji(3, 10), broken],
        })
        .await
        .unwrap();
        tx.send(EntityEvent::Upsert { shard_id: 0, entity: emoji(2, 10) })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(cache.get(&GuildKey::new(10, 1)).await.unwrap(), None);
        assert_eq!(cache.get(&GuildKey::new(10, 3)).await.unwrap(), None);
        assert_eq!(cache.get(&GuildKey::new(10, 2)).await.unwrap(), Some(emoji(2, 10)));
    }

    #[test]
    fn test_event_shard_id() {
        let event: EntityEvent<u64, Emoji> = EntityEvent::ShardResync { shard_id: 4 };
        assert_eq!(event.shard_id(), 4);
        assert_eq!(event.name(), "shard_resync");
    }
}
