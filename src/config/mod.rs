//! Configuration module for shardcache.
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::cache::{CacheConfig, KeyDiscovery};
use crate::store::StoreConfig;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_CAPACITY: u64 = 10_000;
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Redis
    pub redis_url: String,
    pub connection_timeout: Duration,
    pub response_timeout: Duration,

    // Local tier
    /// Zero disables expiry.
    pub cache_ttl: Duration,
    pub cache_max_capacity: u64,
    pub key_discovery: KeyDiscovery,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let key_discovery = match var("CACHE_KEY_DISCOVERY") {
            Some(value) => value
                .parse::<KeyDiscovery>()
                .map_err(|e| anyhow!("CACHE_KEY_DISCOVERY: {}", e))?,
            None => KeyDiscovery::default(),
        };

        Ok(Self {
            redis_url: var("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            connection_timeout: Duration::from_millis(parse_u64(
                &var,
                "REDIS_CONNECTION_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )?),
            response_timeout: Duration::from_millis(parse_u64(
                &var,
                "REDIS_RESPONSE_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )?),
            cache_ttl: Duration::from_secs(parse_u64(&var, "CACHE_TTL_SECS", DEFAULT_TTL_SECS)?),
            cache_max_capacity: parse_u64(&var, "CACHE_MAX_CAPACITY", DEFAULT_MAX_CAPACITY)?,
            key_discovery,
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.redis_url)
            .connection_timeout(self.connection_timeout)
            .response_timeout(self.response_timeout)
    }

    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::default()
            .max_capacity(self.cache_max_capacity)
            .discovery(self.key_discovery);

        if self.cache_ttl.is_zero() {
            config.no_ttl()
        } else {
            config.ttl(self.cache_ttl)
        }
    }
}

fn parse_u64<F>(var: &F, name: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache_max_capacity, 10_000);
        assert_eq!(config.key_discovery, KeyDiscovery::Index);
        assert_eq!(config.response_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("REDIS_URL", "redis://cache:6380/2"),
            ("CACHE_TTL_SECS", "60"),
            ("CACHE_KEY_DISCOVERY", "scan"),
            ("REDIS_RESPONSE_TIMEOUT_MS", " 250 "),
        ])
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6380/2");
        assert_eq!(config.key_discovery, KeyDiscovery::Scan);
        assert_eq!(config.response_timeout, Duration::from_millis(250));

        let cache = config.cache_config();
        assert_eq!(cache.ttl, Some(Duration::from_secs(60)));
        assert_eq!(cache.discovery, KeyDiscovery::Scan);
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let config = config(&[("CACHE_TTL_SECS", "0")]).unwrap();
        assert_eq!(config.cache_config().ttl, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config(&[("CACHE_MAX_CAPACITY", "lots")]).is_err());
        assert!(config(&[("CACHE_KEY_DISCOVERY", "keys")]).is_err());
    }
}
