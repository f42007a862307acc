//! Integration Tests for the Cache Facade
//!
//! Cache-aside behaviour of `Cache::wrap` on the in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use redis_pool_cache::{Cache, CacheError, CacheValue, MemoryServer, StoreConfig};

// == Helper Functions ==

fn create_cache(server: &Arc<MemoryServer>, default_ttl: Option<i64>) -> Cache {
    let config = StoreConfig {
        default_ttl_in_seconds: default_ttl,
        ..StoreConfig::default()
    };
    Cache::new(config, Arc::new(server.connector())).unwrap()
}

// == Wrap ==

#[tokio::test]
async fn test_wrap_runs_producer_once() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, Some(60));
    let calls = AtomicUsize::new(0);

    let first = cache
        .wrap("report", None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(json!({"total": 42}))
        })
        .await
        .unwrap();
    assert_eq!(first, CacheValue::from(json!({"total": 42})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("report").await.unwrap(), Some(first.clone()));

    let second = cache
        .wrap("report", None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(json!({"total": 0}))
        })
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wrap_stores_with_ttl() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, None);

    cache
        .wrap("k", Some(100), || async { Ok::<_, String>("v") })
        .await
        .unwrap();
    let ttl = cache.store().get_ttl("k").await.unwrap();
    assert!((99..=100).contains(&ttl));
}

#[tokio::test]
async fn test_wrap_without_ttl_passes_through() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, None);
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let value = cache
            .wrap("k", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("fresh")
            })
            .await
            .unwrap();
        assert_eq!(value, CacheValue::from("fresh"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_wrap_invalid_ttl_passes_through() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, Some(60));

    let value = cache
        .wrap("k", Some(0), || async { Ok::<_, String>("fresh") })
        .await
        .unwrap();

    assert_eq!(value, CacheValue::from("fresh"));
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_wrap_producer_error_is_not_cached() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, Some(60));

    let err = cache
        .wrap("k", None, || async {
            Err::<CacheValue, _>(std::io::Error::new(std::io::ErrorKind::Other, "db down"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Producer(_)));
    assert!(err.to_string().contains("db down"));
    assert_eq!(cache.get("k").await.unwrap(), None);
}

// == Default TTL ==

#[tokio::test]
async fn test_default_ttl_trio() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, None);

    assert_eq!(cache.get_default_ttl_in_s(), None);
    assert_eq!(cache.set_default_ttl_in_s(5).unwrap(), 5);
    assert_eq!(cache.get_default_ttl_in_s(), Some(5));
    assert!(matches!(
        cache.set_default_ttl_in_s(-3),
        Err(CacheError::InvalidTtl(_))
    ));
    assert_eq!(cache.get_default_ttl_in_s(), Some(5));

    cache.unset_default_ttl_in_s();
    assert_eq!(cache.get_default_ttl_in_s(), None);
}

// == Passthroughs ==

#[tokio::test]
async fn test_passthroughs() {
    let server = MemoryServer::new();
    let cache = create_cache(&server, None);

    cache.set("a:1", "x", None).await.unwrap();
    assert_eq!(
        cache.getset("a:1", "y", None).await.unwrap(),
        Some(CacheValue::from("x"))
    );
    cache.set("a:2", json!([1, 2]), Some(60)).await.unwrap();

    let numbers: Option<Vec<u32>> = cache.get_as("a:2").await.unwrap();
    assert_eq!(numbers, Some(vec![1, 2]));

    assert_eq!(cache.keys("a:*").await.unwrap().len(), 2);
    assert_eq!(cache.del(&["a:1"]).await.unwrap(), 1);
    assert_eq!(cache.delete_all("a:*").await.unwrap(), 1);
    assert!(cache.name().starts_with("cache-"));
    assert_eq!(cache.config().sizing.max, 10);
}
