//! Error types for the pool, store and cache facade
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Boxed error returned by a `wrap` producer.
pub type ProducerError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the pool, the store and the cache facade.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection creation exhausted its retry budget
    #[error("Failed to create connection for pool '{pool}' to {target} after {attempts} attempts: {reason}")]
    ConnectionCreateFailed {
        pool: String,
        target: String,
        attempts: u32,
        reason: String,
    },

    /// No connection became available within the acquire timeout
    #[error("Timed out after {waited:?} waiting for a connection from pool '{pool}'")]
    AcquireTimeout { pool: String, waited: Duration },

    /// Released or destroyed connection was not lent by this pool
    #[error("Connection is not currently part of pool '{0}'")]
    NotPartOfPool(String),

    /// Pool is draining and no longer hands out connections
    #[error("Pool '{0}' is draining")]
    PoolDraining(String),

    /// TTL was not a positive number of seconds
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Cache facade used before `init`
    #[error("Not initialised: {0}")]
    NotInitialised(String),

    /// Delete script stayed unknown to the backend even after a reload
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Failure reported by the backend connection
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Value could not be encoded or decoded as JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend replied with a shape the command never returns
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// Producer passed to `wrap` failed
    #[error("Producer failed: {0}")]
    Producer(ProducerError),
}

impl CacheError {
    /// True when the backend reported an unknown script id.
    pub fn is_no_script(&self) -> bool {
        matches!(self, CacheError::Backend(BackendError::NoScript(_)))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_failed_message_names_pool_and_target() {
        let err = CacheError::ConnectionCreateFailed {
            pool: "orders".to_string(),
            target: "redis://UNAVAILABLE_HOST:6379".to_string(),
            attempts: 3,
            reason: "connection refused".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("orders"));
        assert!(message.contains("UNAVAILABLE_HOST"));
        assert!(message.contains("3 attempts"));
    }

    #[test]
    fn test_no_script_detection() {
        let err = CacheError::from(BackendError::NoScript("NOSCRIPT".to_string()));
        assert!(err.is_no_script());

        let err = CacheError::from(BackendError::Command("ERR".to_string()));
        assert!(!err.is_no_script());
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err = CacheError::from(BackendError::Closed);
        assert_eq!(err.to_string(), BackendError::Closed.to_string());
    }
}
