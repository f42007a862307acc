//! Redis Pool Cache - a resilient connection pool and cache-aside layer
//!
//! Bounded, retrying connection pool in front of Redis (or an in-process
//! backend), a typed command gateway with TTL policy and atomic
//! delete-by-pattern, and a `wrap`-style cache facade.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod logger;
pub mod pool;
pub mod store;

pub use backend::{Backend, BackendError, Connector, MemoryConnector, MemoryServer, Reply};
#[cfg(feature = "redis")]
pub use backend::RedisConnector;
pub use cache::Cache;
pub use config::{BackendOptions, PoolConfig, PoolSizing, RetryOptions, StoreConfig};
pub use error::{CacheError, Result};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use pool::{Connection, ConnectionPool, PoolStatus, RetryPolicy};
pub use store::{CacheValue, Store, Ttl};
