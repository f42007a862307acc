//! Backend Module
//!
//! The seam between the pool and a concrete key-value store. A `Connector`
//! opens links, a `Backend` is one live link that executes commands.
//!
//! # Implementations
//! - `redis` (feature `redis`): Redis over `redis::aio::MultiplexedConnection`
//! - `memory`: in-process store speaking the same command subset

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_impl;

pub use memory::{MemoryBackend, MemoryConnector, MemoryServer};
#[cfg(feature = "redis")]
pub use redis_impl::{RedisBackend, RedisConnector};

// == Backend Error ==
/// Errors raised by a backend connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Could not establish the link
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Link broke while a command was in flight
    #[error("Connection error: {0}")]
    Connection(String),

    /// Script id is not in the server's script cache
    #[error("NOSCRIPT {0}")]
    NoScript(String),

    /// Server rejected the command
    #[error("{0}")]
    Command(String),

    /// Command issued on a closed link
    #[error("Connection closed")]
    Closed,
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// == Reply ==
/// A reply from the store, reduced to the shapes the gateway consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Data(String),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    /// Bulk or status text; `None` for nil.
    pub fn into_text(self) -> Option<String> {
        match self {
            Reply::Data(text) | Reply::Status(text) => Some(text),
            Reply::Int(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Integer value, accepting numeric text.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(value) => Some(*value),
            Reply::Data(text) | Reply::Status(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Flattens an array of text replies.
    pub fn into_strings(self) -> Option<Vec<String>> {
        match self {
            Reply::Array(items) => items.into_iter().map(Reply::into_text).collect(),
            Reply::Nil => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

// == Backend Trait ==
/// One live connection to the store.
///
/// Commands issued on the same connection execute in submission order; the
/// pool guarantees a connection is held by one caller at a time.
#[async_trait]
pub trait Backend: Send + 'static {
    /// Executes a raw command with string arguments.
    async fn execute(&mut self, command: &str, args: &[String]) -> BackendResult<Reply>;

    /// Switches the logical database of this link.
    async fn select_database(&mut self, db: u32) -> BackendResult<()> {
        self.execute("SELECT", &[db.to_string()]).await.map(|_| ())
    }

    /// Loads a script into the server script cache, returning its id.
    async fn load_script(&mut self, source: &str) -> BackendResult<String> {
        let reply = self
            .execute("SCRIPT", &["LOAD".to_string(), source.to_string()])
            .await?;
        reply
            .into_text()
            .ok_or_else(|| BackendError::Command("SCRIPT LOAD returned no id".to_string()))
    }

    /// Evaluates a previously loaded script by id.
    async fn eval_script(
        &mut self,
        script_id: &str,
        keys: &[String],
        args: &[String],
    ) -> BackendResult<Reply> {
        let mut params = Vec::with_capacity(2 + keys.len() + args.len());
        params.push(script_id.to_string());
        params.push(keys.len().to_string());
        params.extend(keys.iter().cloned());
        params.extend(args.iter().cloned());
        self.execute("EVALSHA", &params).await
    }

    /// Closes the link. `flush` waits for in-flight replies first.
    async fn close(&mut self, flush: bool) -> BackendResult<()>;
}

// == Connector Trait ==
/// Opens new backend connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens one connection, resolving once the link is usable.
    async fn connect(&self) -> BackendResult<Box<dyn Backend>>;

    /// Database new connections start on.
    fn default_database(&self) -> u32 {
        0
    }

    /// Human-readable target for logs and errors.
    fn describe(&self) -> String;
}
