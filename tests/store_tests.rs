//! Integration Tests for the Store
//!
//! Typed commands, TTL policy and delete-by-pattern against the in-memory
//! backend.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use redis_pool_cache::{CacheError, CacheValue, MemoryServer, Store, StoreConfig};

// == Helper Functions ==

fn create_store(server: &Arc<MemoryServer>) -> Store {
    let mut config = StoreConfig::default();
    config.pool.name = Some("testStore".to_string());
    Store::new(config, Arc::new(server.connector())).unwrap()
}

// == Values ==

#[tokio::test]
async fn test_object_round_trip() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.set("k", json!({"a": 1}), None).await.unwrap(), "OK");
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1}).into()));
}

#[tokio::test]
async fn test_array_round_trip() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    store.set("k", json!(["x", "y"]), None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!(["x", "y"]).into()));
}

#[tokio::test]
async fn test_raw_text_is_stored_verbatim() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    store.set("k", "hello world", None).await.unwrap();
    assert_eq!(
        store.get("k").await.unwrap(),
        Some(CacheValue::Raw("hello world".to_string()))
    );
    assert_eq!(store.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_as_typed() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        roles: Vec<String>,
    }

    let server = MemoryServer::new();
    let store = create_store(&server);
    let session = Session {
        user: "ada".to_string(),
        roles: vec!["admin".to_string()],
    };

    store
        .set("session:1", CacheValue::json(&session).unwrap(), Some(60))
        .await
        .unwrap();
    let loaded: Option<Session> = store.get_as("session:1").await.unwrap();
    assert_eq!(loaded, Some(session));
}

// == TTL ==

#[tokio::test]
async fn test_value_expires_after_ttl() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    store.set("k", "v", Some(1)).await.unwrap();
    assert!(store.get("k").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_invalid_explicit_ttl_is_rejected() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    for ttl in [0, -1] {
        assert!(matches!(
            store.set("k", "v", Some(ttl)).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert!(matches!(
            store.getset("k", "v", Some(ttl)).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert!(matches!(
            store.expire("k", ttl).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert!(matches!(
            store.set_default_ttl_in_s(ttl),
            Err(CacheError::InvalidTtl(_))
        ));
    }
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_expire_and_get_ttl() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.get_ttl("k").await.unwrap(), -2);
    assert!(!store.expire("k", 10).await.unwrap());

    store.set("k", "v", None).await.unwrap();
    assert_eq!(store.get_ttl("k").await.unwrap(), -1);
    assert!(store.expire("k", 10).await.unwrap());
    assert!((9..=10).contains(&store.get_ttl("k").await.unwrap()));
}

#[tokio::test]
async fn test_default_ttl_settings() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.get_default_ttl_in_s(), None);
    assert_eq!(store.set_default_ttl_in_s(30).unwrap(), 30);
    assert_eq!(store.get_default_ttl_in_s(), Some(30));

    store.set("k", "v", None).await.unwrap();
    assert!((29..=30).contains(&store.get_ttl("k").await.unwrap()));

    store.unset_default_ttl_in_s();
    assert_eq!(store.get_default_ttl_in_s(), None);
}

// == Getset ==

#[tokio::test]
async fn test_getset() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.getset("k", json!({"v": 1}), None).await.unwrap(), None);
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"v": 1}).into()));

    let previous = store.getset("k", json!({"v": 2}), Some(100)).await.unwrap();
    assert_eq!(previous, Some(json!({"v": 1}).into()));
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"v": 2}).into()));
    assert!((99..=100).contains(&store.get_ttl("k").await.unwrap()));
}

// == Keys and Delete ==

#[tokio::test]
async fn test_del_and_keys() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.del(&[]).await.unwrap(), 0);

    store.set("user:1", "a", None).await.unwrap();
    store.set("user:2", "b", None).await.unwrap();
    store.set("order:1", "c", None).await.unwrap();

    let mut keys = store.keys("user:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["user:1", "user:2"]);
    assert_eq!(store.keys("*").await.unwrap().len(), 3);

    assert_eq!(store.del(&["user:1", "user:9"]).await.unwrap(), 1);
    assert_eq!(store.keys("user:*").await.unwrap(), vec!["user:2"]);
}

#[tokio::test]
async fn test_delete_all_by_pattern() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    store.set("key1", "a", None).await.unwrap();
    store.set("key2", "b", None).await.unwrap();

    assert_eq!(store.delete_all("key1*").await.unwrap(), 1);
    assert_eq!(store.get("key2").await.unwrap(), Some(CacheValue::Raw("b".to_string())));
    assert_eq!(store.delete_all("*").await.unwrap(), 1);
    assert_eq!(store.delete_all("*").await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_all_recovers_from_script_flush() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    store.set("a", "1", None).await.unwrap();
    assert_eq!(store.delete_all("*").await.unwrap(), 1);

    server.flush_scripts();
    store.set("b", "2", None).await.unwrap();
    assert_eq!(store.delete_all("*").await.unwrap(), 1);
}

// == Misc ==

#[tokio::test]
async fn test_ping_and_status() {
    let server = MemoryServer::new();
    let store = create_store(&server);

    assert_eq!(store.ping(None).await.unwrap(), "PONG");
    assert_eq!(store.ping(Some("hello")).await.unwrap(), "hello");

    let status = store.status();
    assert_eq!(status.name, "testStore");
    assert_eq!(store.name(), "testStore");
    assert_eq!(status.pending, 0);

    store.drain().await;
    assert_eq!(store.status().size, 0);
    assert!(matches!(store.get("k").await, Err(CacheError::PoolDraining(_))));
}
