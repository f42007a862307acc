//! Pool Module
//!
//! Bounded, priority-aware pool of backend connections.

mod connection;
#[allow(clippy::module_inception)]
mod pool;
mod retry;
mod status;

pub use connection::Connection;
pub use pool::ConnectionPool;
pub use retry::{RetryError, RetryPolicy};
pub use status::PoolStatus;

/// Random name such as `pool-1f3a9c2e`.
pub(crate) fn random_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name_shape() {
        let name = random_name("pool");
        assert!(name.starts_with("pool-"));
        assert_eq!(name.len(), "pool-".len() + 8);
        assert_ne!(random_name("pool"), name);
    }
}
