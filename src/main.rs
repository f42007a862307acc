//! Redis Pool Cache - smoke runner
//!
//! Builds a cache from environment variables, exercises it once and drains
//! the pool. Uses Redis at `REDIS_URL` when built with the `redis` feature,
//! the in-memory backend otherwise.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redis_pool_cache::{Cache, Connector, StoreConfig, TracingLogger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redis_pool_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StoreConfig::from_env();
    info!(
        "Configuration loaded: url={}, db={}, min={}, max={}",
        config.pool.backend.url,
        config.pool.backend.database,
        config.pool.sizing.min,
        config.pool.sizing.max
    );

    let connector = connector(&config)?;
    let cache = Cache::with_logger(config, connector, Some(Arc::new(TracingLogger)))
        .context("building cache")?;
    info!("Cache '{}' created", cache.name());

    let pong = cache.store().ping(None).await.context("ping")?;
    info!("Ping: {}", pong);

    cache.set("smoke:greeting", "hello", Some(30)).await?;
    info!("Read back: {:?}", cache.get("smoke:greeting").await?);

    for round in 1..=2 {
        let value = cache
            .wrap("smoke:report", Some(30), || async move {
                info!("Producing report (round {})", round);
                Ok::<_, anyhow::Error>(json!({"round": round, "items": ["a", "b"]}))
            })
            .await?;
        info!("Wrapped value: {:?}", value);
    }

    let removed = cache.delete_all("smoke:*").await?;
    info!("Removed {} keys", removed);

    info!("Status: {}", serde_json::to_string(&cache.status())?);
    cache.drain().await;
    info!("Smoke run complete");
    Ok(())
}

#[cfg(feature = "redis")]
fn connector(config: &StoreConfig) -> anyhow::Result<Arc<dyn Connector>> {
    let connector = redis_pool_cache::RedisConnector::new(&config.pool.backend)
        .context("invalid REDIS_URL")?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "redis"))]
fn connector(config: &StoreConfig) -> anyhow::Result<Arc<dyn Connector>> {
    let server = redis_pool_cache::MemoryServer::new();
    redis_pool_cache::backend::memory::spawn_expiry_sweeper(
        server.clone(),
        std::time::Duration::from_secs(1),
    );
    Ok(Arc::new(server.connector().with_database(config.pool.backend.database)))
}
