//! Redis backing store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::{debug, info};

use super::HashStore;
use crate::error::StoreError;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// Removes a field and, once the hash is gone, its index entry.
/// KEYS[1] = hash, KEYS[2] = index, ARGV[1] = field.
const HDEL_AND_PRUNE: &str = r"
redis.call('HDEL', KEYS[1], ARGV[1])
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('SREM', KEYS[2], KEYS[1])
    return 1
end
return 0
";

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis connection string, e.g. `redis://localhost:6379/0`.
    pub url: String,

    /// Bound on establishing a connection.
    pub connection_timeout: Duration,

    /// Bound on waiting for a single response.
    pub response_timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

/// Store backed by a reconnecting, multiplexed Redis connection.
///
/// Every operation clones the manager for its own duration, so no caller
/// holds a connection across calls.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a `PING`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connection_timeout)
            .set_response_timeout(config.response_timeout);
        let mut manager = ConnectionManager::new_with_config(client, manager_config).await?;

        let () = redis::cmd("PING").query_async(&mut manager).await?;
        info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl HashStore for RedisStore {
    async fn hset(
        &self,
        index: &str,
        hash: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let () = redis::pipe()
            .atomic()
            .sadd(index, hash)
            .ignore()
            .hset(hash, field, value)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hset_many(
        &self,
        index: &str,
        hash: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len();
        let mut conn = self.connection();
        let () = redis::pipe()
            .atomic()
            .sadd(index, hash)
            .ignore()
            .hset_multiple(hash, &entries)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("HSET {} fields into {}", count, hash);
        Ok(())
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection();
        let value: Option<Vec<u8>> = conn.hget(hash, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut conn = self.connection();
        let entries: HashMap<String, Vec<u8>> = conn.hgetall(hash).await?;
        Ok(entries.into_iter().collect())
    }

    async fn hdel(&self, index: &str, hash: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let pruned: i64 = Script::new(HDEL_AND_PRUNE)
            .key(hash)
            .key(index)
            .arg(field)
            .invoke_async(&mut conn)
            .await?;

        if pruned == 1 {
            debug!("Hash {} emptied, removed from {}", hash, index);
        }
        Ok(())
    }

    async fn del(&self, index: &str, hashes: &[String]) -> Result<(), StoreError> {
        if hashes.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection();
        let () = redis::pipe()
            .atomic()
            .del(hashes)
            .ignore()
            .srem(index, hashes)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, index: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.smembers(index).await?;
        Ok(members)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across iterations.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new("redis://cache:6379/2")
            .connection_timeout(Duration::from_millis(250))
            .response_timeout(Duration::from_secs(2));

        assert_eq!(config.url, "redis://cache:6379/2");
        assert_eq!(config.connection_timeout, Duration::from_millis(250));
        assert_eq!(config.response_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect(&StoreConfig::new("not-a-url")).await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }
}
