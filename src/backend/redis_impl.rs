//! Redis backend.
//!
//! Each pooled connection owns one `MultiplexedConnection` that is never
//! cloned, so commands on it keep submission order and `SELECT` stays local
//! to the link.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, FromRedisValue, IntoConnectionInfo, RedisError, RedisResult, Value};
use tracing::debug;

use super::{Backend, BackendError, BackendResult, Connector, Reply};
use crate::config::BackendOptions;

/// Maps Redis errors to BackendError.
pub fn map_redis_error(err: RedisError) -> BackendError {
    if err.kind() == ErrorKind::NoScriptError {
        BackendError::NoScript(err.to_string())
    } else if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        BackendError::Connection(err.to_string())
    } else if err.is_io_error() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Command(err.to_string())
    }
}

impl FromRedisValue for Reply {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        Ok(match v {
            Value::Nil => Reply::Nil,
            Value::Int(value) => Reply::Int(*value),
            Value::BulkString(bytes) => Reply::Data(String::from_utf8_lossy(bytes).into_owned()),
            Value::SimpleString(text) => Reply::Status(text.clone()),
            Value::Okay => Reply::Status("OK".to_string()),
            Value::Array(items) | Value::Set(items) => Reply::Array(
                items
                    .iter()
                    .map(Reply::from_redis_value)
                    .collect::<RedisResult<Vec<_>>>()?,
            ),
            Value::Boolean(flag) => Reply::Int(i64::from(*flag)),
            Value::Double(number) => Reply::Data(number.to_string()),
            Value::VerbatimString { text, .. } => Reply::Data(text.clone()),
            other => Reply::Data(format!("{:?}", other)),
        })
    }
}

// == Connector ==
/// Opens Redis connections from `BackendOptions`.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: redis::Client,
    database: u32,
    connect_timeout: Duration,
    target: String,
}

impl RedisConnector {
    /// Builds a connector; fails only on a malformed URL.
    pub fn new(options: &BackendOptions) -> BackendResult<Self> {
        let mut info = options
            .url
            .as_str()
            .into_connection_info()
            .map_err(|err| BackendError::Connect(err.to_string()))?;
        info.redis.db = i64::from(options.database);
        let target = format!("{} (db {})", info.addr, options.database);
        let client = redis::Client::open(info).map_err(|err| BackendError::Connect(err.to_string()))?;

        Ok(Self {
            client,
            database: options.database,
            connect_timeout: options.connect_timeout(),
            target,
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> BackendResult<Box<dyn Backend>> {
        debug!(target_addr = %self.target, "Opening redis connection");
        let connecting = self.client.get_multiplexed_async_connection();
        let conn = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(result) => result.map_err(|err| BackendError::Connect(err.to_string()))?,
            Err(_) => {
                return Err(BackendError::Connect(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };
        debug!(target_addr = %self.target, "Redis connection established");
        Ok(Box::new(RedisBackend { conn: Some(conn) }))
    }

    fn default_database(&self) -> u32 {
        self.database
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

// == Backend ==
/// One Redis link.
pub struct RedisBackend {
    conn: Option<MultiplexedConnection>,
}

#[async_trait]
impl Backend for RedisBackend {
    async fn execute(&mut self, command: &str, args: &[String]) -> BackendResult<Reply> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        let mut cmd = redis::cmd(command);
        for arg in args {
            cmd.arg(arg);
        }
        let reply: Reply = cmd.query_async(conn).await.map_err(map_redis_error)?;
        Ok(reply)
    }

    async fn close(&mut self, _flush: bool) -> BackendResult<()> {
        // Dropping the multiplexed connection ends its driver task.
        match self.conn.take() {
            Some(_) => Ok(()),
            None => Err(BackendError::Closed),
        }
    }
}
