//! Expiry Sweeper
//!
//! Background task that periodically removes expired entries from a
//! `MemoryServer`, so idle keys do not linger until their next access.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::MemoryServer;

/// Spawns a task purging expired entries every `interval`.
///
/// Abort the returned handle to stop the sweeper.
pub fn spawn_expiry_sweeper(server: Arc<MemoryServer>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting expiry sweeper");

        loop {
            tokio::time::sleep(interval).await;

            let removed = server.purge_expired();
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Connector;

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let server = MemoryServer::new();
        let mut conn = server.connector().connect().await.unwrap();
        conn.execute("SETEX", &["expire_soon".into(), "1".into(), "v".into()])
            .await
            .unwrap();
        conn.execute("SET", &["long_lived".into(), "v".into()])
            .await
            .unwrap();

        let handle = spawn_expiry_sweeper(server.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(server.purge_expired(), 0, "Sweeper should have purged already");
        assert_eq!(server.db_size(0), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweeper_can_be_aborted() {
        let handle = spawn_expiry_sweeper(MemoryServer::new(), Duration::from_secs(1));

        handle.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
