//! Store Module
//!
//! Typed cache operations on top of a connection pool.
//!
//! # Responsibilities
//! - Encoding values on write and decoding them on read
//! - Validating TTLs and applying the store's default TTL
//! - Atomic delete-by-pattern through a server-side script

mod script;
mod ttl;
mod value;

use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{Connector, Reply};
use crate::config::{PoolConfig, StoreConfig};
use crate::error::{CacheError, Result};
use crate::logger::Logger;
use crate::pool::{ConnectionPool, PoolStatus};

pub use script::{DELETE_BATCH, DELETE_BY_PATTERN_SCRIPT};
pub use ttl::Ttl;
pub use value::CacheValue;

// == Store ==
/// Command gateway over a `ConnectionPool`.
#[derive(Debug)]
pub struct Store {
    pool: ConnectionPool,
    default_ttl: RwLock<Option<Ttl>>,
    /// Memoized id of the loaded delete script
    delete_script: Mutex<Option<String>>,
}

impl Store {
    // == Constructor ==
    /// Builds the store and its pool.
    ///
    /// Fails with `InvalidTtl` when the configured default TTL is not
    /// positive.
    pub fn new(config: StoreConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::with_logger(config, connector, None)
    }

    pub fn with_logger(
        config: StoreConfig,
        connector: Arc<dyn Connector>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self> {
        let default_ttl = config
            .default_ttl_in_seconds
            .map(Ttl::from_secs)
            .transpose()?;

        let mut pool_config = config.pool;
        if pool_config.name.is_none() {
            pool_config.name = Some(crate::pool::random_name("store"));
        }

        Ok(Self {
            pool: ConnectionPool::with_logger(pool_config, connector, logger),
            default_ttl: RwLock::new(default_ttl),
            delete_script: Mutex::new(None),
        })
    }

    // == Accessors ==
    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &PoolConfig {
        self.pool.config()
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Drains the underlying pool.
    pub async fn drain(&self) {
        self.pool.drain().await
    }

    // == Default TTL ==
    pub fn get_default_ttl_in_s(&self) -> Option<u64> {
        self.default_ttl().map(|ttl| ttl.as_secs())
    }

    /// Sets the default TTL, returning it.
    pub fn set_default_ttl_in_s(&self, seconds: i64) -> Result<u64> {
        let ttl = Ttl::from_secs(seconds)?;
        *self
            .default_ttl
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(ttl);
        Ok(ttl.as_secs())
    }

    pub fn unset_default_ttl_in_s(&self) {
        *self
            .default_ttl
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn default_ttl(&self) -> Option<Ttl> {
        *self
            .default_ttl
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn logger(&self) -> &Arc<dyn Logger> {
        self.pool.logger()
    }

    // == Commands ==
    /// Returns the message, or "PONG" without one.
    pub async fn ping(&self, message: Option<&str>) -> Result<String> {
        let args: Vec<String> = message.map(str::to_string).into_iter().collect();
        let reply = self.pool.send_command("PING", &args).await?;
        text_reply("PING", reply)
    }

    /// Reads a value; `None` when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let reply = self.pool.send_command("GET", &[key.to_string()]).await?;
        Ok(optional_text("GET", reply)?.map(CacheValue::decode))
    }

    /// Reads a value and deserializes it into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .await?
            .map(CacheValue::into_typed)
            .transpose()
    }

    /// Writes a value, with an expiry when an explicit or default TTL applies.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl_in_seconds: Option<i64>,
    ) -> Result<String> {
        let ttl = Ttl::resolve(ttl_in_seconds, self.default_ttl())?;
        self.write(key, &value.into(), ttl).await
    }

    pub(crate) async fn write(&self, key: &str, value: &CacheValue, ttl: Option<Ttl>) -> Result<String> {
        let encoded = value.encode()?;
        let reply = match ttl {
            Some(ttl) => {
                self.pool
                    .send_command("SETEX", &[key.to_string(), ttl.as_secs().to_string(), encoded])
                    .await?
            }
            None => self.pool.send_command("SET", &[key.to_string(), encoded]).await?,
        };
        text_reply("SET", reply)
    }

    /// Swaps in a new value, returning the previous one.
    ///
    /// The TTL is applied by a follow-up EXPIRE and is not atomic with the
    /// swap.
    pub async fn getset(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl_in_seconds: Option<i64>,
    ) -> Result<Option<CacheValue>> {
        let ttl = Ttl::resolve(ttl_in_seconds, self.default_ttl())?;
        let encoded = value.into().encode()?;

        let reply = self
            .pool
            .send_command("GETSET", &[key.to_string(), encoded])
            .await?;
        let previous = optional_text("GETSET", reply)?.map(CacheValue::decode);

        if let Some(ttl) = ttl {
            self.pool
                .send_command("EXPIRE", &[key.to_string(), ttl.as_secs().to_string()])
                .await?;
        }
        Ok(previous)
    }

    /// Deletes keys, returning how many existed.
    pub async fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let args: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let reply = self.pool.send_command("DEL", &args).await?;
        count_reply("DEL", reply)
    }

    /// Sets a key's TTL; false when the key does not exist.
    pub async fn expire(&self, key: &str, ttl_in_seconds: i64) -> Result<bool> {
        let ttl = Ttl::from_secs(ttl_in_seconds)?;
        let reply = self
            .pool
            .send_command("EXPIRE", &[key.to_string(), ttl.as_secs().to_string()])
            .await?;
        Ok(int_reply("EXPIRE", reply)? == 1)
    }

    /// Remaining TTL in seconds; -2 when missing, -1 without expiry.
    pub async fn get_ttl(&self, key: &str) -> Result<i64> {
        let reply = self.pool.send_command("TTL", &[key.to_string()]).await?;
        int_reply("TTL", reply)
    }

    /// Lists keys matching a glob pattern. Walks the whole keyspace.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let reply = self.pool.send_command("KEYS", &[pattern.to_string()]).await?;
        let description = format!("{:?}", reply);
        reply.into_strings().ok_or(CacheError::UnexpectedReply {
            command: "KEYS".to_string(),
            reply: description,
        })
    }

    // == Delete All ==
    /// Deletes every key matching `pattern` with a server-side SCAN loop,
    /// returning how many were removed.
    ///
    /// If the server lost the script, it is reloaded and the call retried
    /// once.
    pub async fn delete_all(&self, pattern: &str) -> Result<u64> {
        debug!(store = %self.name(), pattern, "Clearing keys");
        let args = [pattern.to_string(), DELETE_BATCH.to_string()];

        let mut reloaded = false;
        loop {
            let script_id = self.delete_script_id().await?;
            match self.pool.eval_script(&script_id, &[], &args).await {
                Ok(reply) => {
                    let removed = count_reply("EVALSHA", reply)?;
                    info!(store = %self.name(), pattern, removed, "Keys cleared");
                    return Ok(removed);
                }
                Err(err) if err.is_no_script() => {
                    self.forget_delete_script(&script_id).await;
                    if reloaded {
                        return Err(CacheError::ScriptNotFound(script_id));
                    }
                    debug!(store = %self.name(), "Delete script missing on server, reloading");
                    reloaded = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn delete_script_id(&self) -> Result<String> {
        let mut memo = self.delete_script.lock().await;
        if let Some(id) = memo.as_ref() {
            return Ok(id.clone());
        }
        let id = self.pool.load_script(DELETE_BY_PATTERN_SCRIPT).await?;
        debug!(store = %self.name(), script = %id, "Delete script loaded");
        *memo = Some(id.clone());
        Ok(id)
    }

    async fn forget_delete_script(&self, script_id: &str) {
        let mut memo = self.delete_script.lock().await;
        if memo.as_deref() == Some(script_id) {
            *memo = None;
        }
    }
}

// == Reply Helpers ==
fn unexpected(command: &str, reply: &Reply) -> CacheError {
    CacheError::UnexpectedReply {
        command: command.to_string(),
        reply: format!("{:?}", reply),
    }
}

fn text_reply(command: &str, reply: Reply) -> Result<String> {
    optional_text(command, reply)?.ok_or_else(|| unexpected(command, &Reply::Nil))
}

fn optional_text(command: &str, reply: Reply) -> Result<Option<String>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Data(text) | Reply::Status(text) => Ok(Some(text)),
        other => Err(unexpected(command, &other)),
    }
}

fn int_reply(command: &str, reply: Reply) -> Result<i64> {
    reply.as_int().ok_or_else(|| unexpected(command, &reply))
}

fn count_reply(command: &str, reply: Reply) -> Result<u64> {
    let value = int_reply(command, reply)?;
    Ok(value.max(0) as u64)
}
