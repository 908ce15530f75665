//! Typed local cache wrapper around Moka.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use moka::future::Cache;
use tracing::warn;

use super::CacheConfig;

/// The in-process tier in front of the backing store.
///
/// This cache is:
/// - Thread-safe and clone-friendly (clones share the same entries)
/// - Bounded, with optional TTL/TTI
/// - Single-flight: concurrent misses on one key run one loader
pub struct LocalCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    name: Arc<str>,
}

// Manual Clone implementation that doesn't require K: Clone, V: Clone
impl<K, V> Clone for LocalCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, V> LocalCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new local cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: &CacheConfig) -> Self {
        let name = name.into();
        let mut builder = Cache::builder()
            .name(&name)
            .max_capacity(config.max_capacity)
            .support_invalidation_closures();

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.tti {
            builder = builder.time_to_idle(tti);
        }

        Self {
            inner: builder.build(),
            name,
        }
    }

    /// Get the name of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a key-value pair into the cache.
    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Get a value if present and not expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    /// Remove a key from the cache.
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Remove all entries from the cache.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Remove every entry matching `predicate`.
    ///
    /// Falls back to clearing the whole cache if the predicate cannot be
    /// registered, which only costs extra reloads.
    pub fn invalidate_if<F>(&self, predicate: F)
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        if let Err(e) = self.inner.invalidate_entries_if(predicate) {
            warn!("Cache '{}' predicate invalidation failed ({}), clearing", self.name, e);
            self.inner.invalidate_all();
        }
    }

    /// Get the number of entries in the cache.
    ///
    /// Note: This may not be perfectly accurate due to concurrent operations.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Apply pending evictions and invalidations.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Get or try to insert a value using a fallible loader.
    ///
    /// Concurrent callers missing on the same key await one loader. Errors
    /// are returned to every waiter and never cached.
    pub async fn get_or_try_insert_with<F, E>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.inner.try_get_with(key, init).await
    }
}

impl<K, V> std::fmt::Debug for LocalCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("name", &self.name)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_loader_runs_once_for_concurrent_misses() {
        let cache: LocalCache<u64, String> = LocalCache::new("test", &CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let loads = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get_or_try_insert_with(1, async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, String>("Admin".to_string())
                    })
                    .await
            }
        });

        let results = futures::future::join_all(loads).await;
        assert!(results.iter().all(|r| r.as_deref() == Ok("Admin")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_errors_are_not_cached() {
        let cache: LocalCache<u64, String> = LocalCache::new("test", &CacheConfig::default());

        let first = cache
            .get_or_try_insert_with(1, async { Err::<String, _>("offline".to_string()) })
            .await;
        assert!(first.is_err());
        assert_eq!(cache.get(&1).await, None);

        let second = cache
            .get_or_try_insert_with(1, async { Ok::<_, String>("Admin".to_string()) })
            .await;
        assert_eq!(second.unwrap(), "Admin");
    }

    #[tokio::test]
    async fn test_invalidate_if() {
        let cache: LocalCache<u64, u32> = LocalCache::new("test", &CacheConfig::default());
        cache.insert(1, 0).await;
        cache.insert(2, 1).await;

        cache.invalidate_if(|_, shard| *shard == 0);
        cache.sync().await;

        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&2).await, Some(1));
    }
}
