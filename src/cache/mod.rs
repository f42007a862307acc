//! Cache Module
//!
//! Cache-aside facade over a `Store`.
//!
//! `Cache` is a cheap, cloneable context object. The `global` functions keep
//! one process-wide instance for callers that prefer not to pass it around.

mod global;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::Connector;
use crate::config::{PoolConfig, StoreConfig};
use crate::error::{CacheError, ProducerError, Result};
use crate::logger::Logger;
use crate::pool::PoolStatus;
use crate::store::{CacheValue, Store, Ttl};

pub use global::{
    cache, del, delete_all, get, get_config, get_default_ttl_in_s, get_name, get_status,
    get_store, getset, init, init_with_logger, is_initialised, keys, set, set_default_ttl_in_s,
    unset_default_ttl_in_s, wrap,
};

// == Cache ==
/// Cache-aside operations sharing one store.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Arc<Store>,
}

impl Cache {
    // == Constructor ==
    pub fn new(config: StoreConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::with_logger(config, connector, None)
    }

    pub fn with_logger(
        mut config: StoreConfig,
        connector: Arc<dyn Connector>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        if config.pool.name.is_none() {
            config.pool.name = Some(crate::pool::random_name("cache"));
        }
        Ok(Self::from_store(Store::with_logger(config, connector, logger)?))
    }

    pub fn from_store(store: Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    // == Accessors ==
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn status(&self) -> PoolStatus {
        self.store.status()
    }

    pub fn config(&self) -> &PoolConfig {
        self.store.config()
    }

    pub fn get_default_ttl_in_s(&self) -> Option<u64> {
        self.store.get_default_ttl_in_s()
    }

    pub fn set_default_ttl_in_s(&self, seconds: i64) -> Result<u64> {
        self.store.set_default_ttl_in_s(seconds)
    }

    pub fn unset_default_ttl_in_s(&self) {
        self.store.unset_default_ttl_in_s()
    }

    // == Wrap ==
    /// Returns the cached value for `key`, or runs `producer`, caches its
    /// result and returns it.
    ///
    /// Caching only happens with an effective TTL: the explicit one, else
    /// the default. An invalid explicit TTL is logged and disables caching
    /// for the call. Blank cached values (empty, null, false, 0) count as a
    /// miss. Concurrent misses may each run the producer.
    pub async fn wrap<F, Fut, V, E>(
        &self,
        key: &str,
        ttl_in_seconds: Option<i64>,
        producer: F,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Into<CacheValue>,
        E: Into<ProducerError>,
    {
        let Some(ttl) = self.effective_ttl(key, ttl_in_seconds) else {
            return produce(producer).await.map(Into::into);
        };

        if let Some(cached) = self.store.get(key).await? {
            if !cached.is_blank() {
                debug!(cache = %self.name(), key, "Cache hit");
                return Ok(cached);
            }
        }

        debug!(cache = %self.name(), key, "Cache miss");
        let value: CacheValue = produce(producer).await?.into();
        self.store.write(key, &value, Some(ttl)).await?;
        Ok(value)
    }

    /// Typed `wrap`: the producer's value is stored as JSON and cached
    /// values are deserialized into `T`.
    pub async fn wrap_as<T, F, Fut, E>(
        &self,
        key: &str,
        ttl_in_seconds: Option<i64>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ProducerError>,
    {
        let value = self
            .wrap(key, ttl_in_seconds, move || async move {
                let produced = produce(producer).await?;
                CacheValue::json(&produced)
            })
            .await;

        match value {
            Ok(value) => value.into_typed(),
            // Producer errors come back wrapped twice; unwrap one level.
            Err(CacheError::Producer(err)) => match err.downcast::<CacheError>() {
                Ok(inner) => Err(*inner),
                Err(err) => Err(CacheError::Producer(err)),
            },
            Err(err) => Err(err),
        }
    }

    fn effective_ttl(&self, key: &str, ttl_in_seconds: Option<i64>) -> Option<Ttl> {
        match ttl_in_seconds {
            None => self.store.default_ttl(),
            Some(seconds) => match Ttl::from_secs(seconds) {
                Ok(ttl) => Some(ttl),
                Err(err) => {
                    warn!(cache = %self.name(), key, error = %err, "Not caching");
                    self.store
                        .logger()
                        .warn(&format!("Not caching {}: {}", key, err));
                    None
                }
            },
        }
    }

    // == Passthroughs ==
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.store.get(key).await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.store.get_as(key).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl_in_seconds: Option<i64>,
    ) -> Result<String> {
        self.store.set(key, value, ttl_in_seconds).await
    }

    pub async fn getset(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl_in_seconds: Option<i64>,
    ) -> Result<Option<CacheValue>> {
        self.store.getset(key, value, ttl_in_seconds).await
    }

    pub async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.store.del(keys).await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.store.keys(pattern).await
    }

    pub async fn delete_all(&self, pattern: &str) -> Result<u64> {
        self.store.delete_all(pattern).await
    }

    pub async fn drain(&self) {
        self.store.drain().await
    }
}

async fn produce<F, Fut, V, E>(producer: F) -> Result<V>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<V, E>>,
    E: Into<ProducerError>,
{
    producer().await.map_err(|err| CacheError::Producer(err.into()))
}
