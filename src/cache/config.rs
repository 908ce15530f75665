//! Cache configuration.

use std::str::FromStr;
use std::time::Duration;

/// How an engine finds the hashes belonging to its cache type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyDiscovery {
    /// Read the per-type index set maintained alongside every write.
    #[default]
    Index,

    /// Enumerate keys by glob pattern. Works against stores written
    /// without the index, at the cost of a keyspace scan.
    Scan,
}

impl FromStr for KeyDiscovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" => Ok(Self::Index),
            "scan" => Ok(Self::Scan),
            other => Err(format!("unknown key discovery '{}', expected 'index' or 'scan'", other)),
        }
    }
}

/// Configuration for an entity cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the local tier.
    pub max_capacity: u64,

    /// Time-to-live for local entries.
    /// After this duration, entries are reloaded from the backing store.
    pub ttl: Option<Duration>,

    /// Time-to-idle for local entries.
    pub tti: Option<Duration>,

    /// Hash enumeration strategy for lookups, `get_all` and invalidation.
    pub discovery: KeyDiscovery,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Some(Duration::from_secs(3600)), // 1 hour
            tti: None,
            discovery: KeyDiscovery::Index,
        }
    }
}

impl CacheConfig {
    /// Set max capacity for the local tier (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Set time-to-live for local entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Set time-to-idle for local entries.
    #[must_use]
    pub fn tti(mut self, duration: Duration) -> Self {
        self.tti = Some(duration);
        self
    }

    /// Disable TTL (entries only leave on eviction or mutation).
    #[must_use]
    pub fn no_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    #[must_use]
    pub fn discovery(mut self, discovery: KeyDiscovery) -> Self {
        self.discovery = discovery;
        self
    }
}
