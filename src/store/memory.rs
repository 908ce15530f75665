//! In-process backing store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use globset::Glob;

use super::HashStore;
use crate::error::StoreError;

/// Store holding hashes in process memory.
///
/// Mirrors the Redis semantics the engine relies on: a hash disappears
/// once its last field is removed, and index sets are plain string sets.
/// Cloning shares the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    hashes: Arc<DashMap<String, HashMap<String, Vec<u8>>>>,
    indexes: Arc<DashMap<String, HashSet<String>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of hashes currently stored.
    pub fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    /// Check if a hash exists.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.hashes.contains_key(hash)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn register(&self, index: &str, hash: &str) {
        self.indexes
            .entry(index.to_string())
            .or_default()
            .insert(hash.to_string());
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn hset(
        &self,
        index: &str,
        hash: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.register(index, hash);
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hset_many(
        &self,
        index: &str,
        hash: &str,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        if entries.is_empty() {
            return Ok(());
        }
        self.register(index, hash);
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .hashes
            .get(hash)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hgetall(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .hashes
            .get(hash)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hdel(&self, index: &str, hash: &str, field: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let emptied = match self.hashes.get_mut(hash) {
            Some(mut fields) => {
                fields.remove(field);
                fields.is_empty()
            }
            None => false,
        };
        if emptied && self.hashes.remove_if(hash, |_, fields| fields.is_empty()).is_some() {
            if let Some(mut members) = self.indexes.get_mut(index) {
                members.remove(hash);
            }
        }
        Ok(())
    }

    async fn del(&self, index: &str, hashes: &[String]) -> Result<(), StoreError> {
        self.ensure_online()?;
        for hash in hashes {
            self.hashes.remove(hash);
        }
        if let Some(mut members) = self.indexes.get_mut(index) {
            for hash in hashes {
                members.remove(hash);
            }
        }
        Ok(())
    }

    async fn members(&self, index: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_online()?;
        Ok(self
            .indexes
            .get(index)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_online()?;
        let matcher = Glob::new(pattern)?.compile_matcher();
        let mut keys: Vec<String> = self
            .hashes
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &MemoryStore, hashes: &[&str]) {
        for hash in hashes {
            store.hset("index:ROLES", hash, "1", b"a".to_vec()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_scan_matches_redis_glob_patterns() {
        let store = MemoryStore::new();
        seed(&store, &["0-ROLES", "3-100-ROLES", "3-1000-ROLES", "12-ROLES", "7-USERS"]).await;

        assert_eq!(
            store.scan("*-ROLES").await.unwrap(),
            vec!["0-ROLES", "12-ROLES", "3-100-ROLES", "3-1000-ROLES"]
        );
        assert_eq!(store.scan("*-100-ROLES").await.unwrap(), vec!["3-100-ROLES"]);
        assert_eq!(store.scan("?-ROLES").await.unwrap(), vec!["0-ROLES"]);
        assert_eq!(store.scan("[0-2]*-ROLES").await.unwrap(), vec!["0-ROLES", "12-ROLES"]);
        assert!(store.scan("7-ROLES").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_rejects_malformed_pattern() {
        let store = MemoryStore::new();
        let result = store.scan("[0-ROLES").await;
        assert!(matches!(result, Err(StoreError::Pattern(_))));
    }

    #[tokio::test]
    async fn test_hdel_removes_empty_hash() {
        let store = MemoryStore::new();
        store.hset("index:ROLES", "0-ROLES", "1", b"a".to_vec()).await.unwrap();
        assert!(store.contains_hash("0-ROLES"));

        store.hset("index:ROLES", "0-ROLES", "2", b"b".to_vec()).await.unwrap();

        store.hdel("index:ROLES", "0-ROLES", "1").await.unwrap();
        assert_eq!(store.members("index:ROLES").await.unwrap(), vec!["0-ROLES".to_string()]);

        store.hdel("index:ROLES", "0-ROLES", "2").await.unwrap();
        assert!(!store.contains_hash("0-ROLES"));
        assert_eq!(store.hash_count(), 0);
        assert!(store.members("index:ROLES").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_del_unregisters_index() {
        let store = MemoryStore::new();
        store.hset("index:ROLES", "0-ROLES", "1", b"a".to_vec()).await.unwrap();
        store.hset("index:ROLES", "1-ROLES", "2", b"b".to_vec()).await.unwrap();

        store.del("index:ROLES", &["0-ROLES".to_string()]).await.unwrap();

        let members = store.members("index:ROLES").await.unwrap();
        assert_eq!(members, vec!["1-ROLES".to_string()]);
        assert_eq!(store.hget("0-ROLES", "1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let result = store.hget("0-ROLES", "1").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.set_offline(false);
        assert_eq!(store.hget("0-ROLES", "1").await.unwrap(), None);
    }
}
