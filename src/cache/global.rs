//! Process-wide cache instance.
//!
//! `init` builds the instance once; later calls return it unchanged, whatever
//! configuration they pass. Every other function fails with
//! `NotInitialised` until then.

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, info};

use super::Cache;
use crate::backend::Connector;
use crate::config::{PoolConfig, StoreConfig};
use crate::error::{CacheError, ProducerError, Result};
use crate::logger::Logger;
use crate::pool::PoolStatus;
use crate::store::{CacheValue, Store};

static CACHE: OnceLock<Cache> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

// == Init ==
/// Builds the process-wide cache, or returns the existing one.
pub fn init(config: StoreConfig, connector: Arc<dyn Connector>) -> Result<&'static Cache> {
    init_with_logger(config, connector, None)
}

pub fn init_with_logger(
    config: StoreConfig,
    connector: Arc<dyn Connector>,
    logger: Option<Arc<dyn Logger>>,
) -> Result<&'static Cache> {
    let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = CACHE.get() {
        debug!(cache = %existing.name(), "Cache already initialised");
        return Ok(existing);
    }

    let built = Cache::with_logger(config, connector, logger)?;
    let cache = CACHE.get_or_init(|| built);
    info!(cache = %cache.name(), "Cache initialised");
    Ok(cache)
}

pub fn is_initialised() -> bool {
    CACHE.get().is_some()
}

/// The process-wide cache.
pub fn cache() -> Result<&'static Cache> {
    CACHE
        .get()
        .ok_or_else(|| CacheError::NotInitialised("call init() before using the cache".to_string()))
}

pub fn get_store() -> Result<&'static Store> {
    cache().map(Cache::store)
}

// == Accessors ==
pub fn get_name() -> Result<&'static str> {
    cache().map(Cache::name)
}

pub fn get_status() -> Result<PoolStatus> {
    cache().map(Cache::status)
}

pub fn get_config() -> Result<&'static PoolConfig> {
    cache().map(Cache::config)
}

pub fn get_default_ttl_in_s() -> Result<Option<u64>> {
    cache().map(Cache::get_default_ttl_in_s)
}

pub fn set_default_ttl_in_s(seconds: i64) -> Result<u64> {
    cache()?.set_default_ttl_in_s(seconds)
}

pub fn unset_default_ttl_in_s() -> Result<()> {
    cache().map(Cache::unset_default_ttl_in_s)
}

// == Operations ==
pub async fn get(key: &str) -> Result<Option<CacheValue>> {
    cache()?.get(key).await
}

pub async fn set(key: &str, value: impl Into<CacheValue>, ttl_in_seconds: Option<i64>) -> Result<String> {
    cache()?.set(key, value, ttl_in_seconds).await
}

pub async fn getset(
    key: &str,
    value: impl Into<CacheValue>,
    ttl_in_seconds: Option<i64>,
) -> Result<Option<CacheValue>> {
    cache()?.getset(key, value, ttl_in_seconds).await
}

pub async fn del(keys: &[&str]) -> Result<u64> {
    cache()?.del(keys).await
}

pub async fn keys(pattern: &str) -> Result<Vec<String>> {
    cache()?.keys(pattern).await
}

pub async fn delete_all(pattern: &str) -> Result<u64> {
    cache()?.delete_all(pattern).await
}

pub async fn wrap<F, Fut, V, E>(key: &str, ttl_in_seconds: Option<i64>, producer: F) -> Result<CacheValue>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<V, E>>,
    V: Into<CacheValue>,
    E: Into<ProducerError>,
{
    cache()?.wrap(key, ttl_in_seconds, producer).await
}
