//! Configuration Module
//!
//! Construction options for pools, stores and the cache facade. Options can
//! be deserialized from a host application's config or loaded from
//! environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::RetryPolicy;

// == Backend Options ==
/// How to reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    /// Connection URL, e.g. "redis://127.0.0.1:6379"
    pub url: String,
    /// Logical database new connections select
    pub database: u32,
    /// Upper bound for one connect attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl BackendOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            database: 0,
            connect_timeout_ms: 5_000,
        }
    }
}

// == Pool Sizing ==
/// Pool bounds and queueing behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSizing {
    /// Connections kept open even when idle
    pub min: usize,
    /// Hard upper bound on open connections
    pub max: usize,
    /// How long an acquire may wait; None waits indefinitely
    pub acquire_timeout_ms: Option<u64>,
    /// Number of priority levels; 0 is served first
    pub priority_range: u32,
}

impl PoolSizing {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Clamps the bounds into a usable shape: `1 <= max`, `min <= max`,
    /// at least one priority level.
    pub fn normalized(mut self) -> Self {
        self.max = self.max.max(1);
        self.min = self.min.min(self.max);
        self.priority_range = self.priority_range.max(1);
        self
    }
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            acquire_timeout_ms: Some(10_000),
            priority_range: 1,
        }
    }
}

// == Retry Options ==
/// Retry budget for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total connect attempts, including the first
    pub attempts: u32,
    /// Delay before the first retry, doubled for each following one
    pub base_delay_ms: u64,
    /// Cap for a single delay
    pub max_delay_ms: u64,
}

impl RetryOptions {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

// == Pool Config ==
/// Everything a pool needs; immutable once the pool is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name; a random one is generated when unset
    pub name: Option<String>,
    pub backend: BackendOptions,
    pub sizing: PoolSizing,
    pub retry: RetryOptions,
}

// == Store Config ==
/// Pool options plus the store's default TTL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub pool: PoolConfig,
    /// TTL applied to writes that carry none
    pub default_ttl_in_seconds: Option<i64>,
}

impl StoreConfig {
    /// Loads options from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Pool/store name (default: random)
    /// - `REDIS_URL` - Backend URL (default: redis://127.0.0.1:6379)
    /// - `REDIS_DB` - Logical database (default: 0)
    /// - `REDIS_CONNECT_TIMEOUT_MS` - Connect timeout (default: 5000)
    /// - `POOL_MIN` / `POOL_MAX` - Pool bounds (default: 1 / 10)
    /// - `POOL_ACQUIRE_TIMEOUT_MS` - Acquire timeout (default: 10000)
    /// - `POOL_PRIORITY_RANGE` - Priority levels (default: 1)
    /// - `POOL_CONNECT_ATTEMPTS` - Connect attempts (default: 3)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: unset)
    pub fn from_env() -> Self {
        let backend = BackendOptions::default();
        let sizing = PoolSizing::default();
        let retry = RetryOptions::default();

        Self {
            pool: PoolConfig {
                name: env::var("CACHE_NAME").ok().filter(|name| !name.is_empty()),
                backend: BackendOptions {
                    url: env::var("REDIS_URL").unwrap_or(backend.url),
                    database: env_or("REDIS_DB", backend.database),
                    connect_timeout_ms: env_or("REDIS_CONNECT_TIMEOUT_MS", backend.connect_timeout_ms),
                },
                sizing: PoolSizing {
                    min: env_or("POOL_MIN", sizing.min),
                    max: env_or("POOL_MAX", sizing.max),
                    acquire_timeout_ms: env_parse("POOL_ACQUIRE_TIMEOUT_MS")
                        .or(sizing.acquire_timeout_ms),
                    priority_range: env_or("POOL_PRIORITY_RANGE", sizing.priority_range),
                },
                retry: RetryOptions {
                    attempts: env_or("POOL_CONNECT_ATTEMPTS", retry.attempts),
                    ..retry
                },
            },
            default_ttl_in_seconds: env_parse("CACHE_DEFAULT_TTL"),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_parse(name).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.pool.backend.url, "redis://127.0.0.1:6379");
        assert_eq!(config.pool.sizing.min, 1);
        assert_eq!(config.pool.sizing.max, 10);
        assert_eq!(config.pool.retry.attempts, 3);
        assert!(config.pool.name.is_none());
        assert!(config.default_ttl_in_seconds.is_none());
    }

    #[test]
    fn test_config_from_env_defaults() {
        for name in [
            "CACHE_NAME",
            "REDIS_URL",
            "REDIS_DB",
            "REDIS_CONNECT_TIMEOUT_MS",
            "POOL_MIN",
            "POOL_MAX",
            "POOL_ACQUIRE_TIMEOUT_MS",
            "POOL_PRIORITY_RANGE",
            "POOL_CONNECT_ATTEMPTS",
            "CACHE_DEFAULT_TTL",
        ] {
            env::remove_var(name);
        }

        let config = StoreConfig::from_env();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_sizing_normalized() {
        let sizing = PoolSizing {
            min: 5,
            max: 0,
            acquire_timeout_ms: None,
            priority_range: 0,
        }
        .normalized();

        assert_eq!(sizing.max, 1);
        assert_eq!(sizing.min, 1);
        assert_eq!(sizing.priority_range, 1);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"name":"orders","sizing":{"min":2,"max":4},"default_ttl_in_seconds":60}"#,
        )
        .unwrap();

        assert_eq!(config.pool.name.as_deref(), Some("orders"));
        assert_eq!(config.pool.sizing.min, 2);
        assert_eq!(config.pool.sizing.max, 4);
        assert_eq!(config.pool.sizing.priority_range, 1);
        assert_eq!(config.pool.backend, BackendOptions::default());
        assert_eq!(config.default_ttl_in_seconds, Some(60));
    }
}
