//! Integration tests for the Redis-backed collaborators.
//!
//! These spin up a real Redis instance via testcontainers and are ignored
//! by default; run them with `cargo test -p stratus-redis -- --ignored`
//! when a Docker daemon is available.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

use stratus_core::{
    DistributedLock, FilterStore, MessageHandler, PubSubChannel, RemoteTier,
};
use stratus_redis::{
    RedisBus, RedisFilterStore, RedisLockManager, RedisRemote, RedisSettings, create_pool,
};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> deadpool_redis::Pool {
    let settings = RedisSettings {
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    };
    create_pool(&settings).await.expect("connect to redis")
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn remote_tier_set_get_delete() {
    let remote = RedisRemote::new(pool().await);

    remote
        .set("it:k1", b"v1".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(remote.get("it:k1").await.unwrap(), Some(b"v1".to_vec()));

    remote.delete("it:k1").await.unwrap();
    assert_eq!(remote.get("it:k1").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn remote_tier_expires_entries() {
    let remote = RedisRemote::new(pool().await);

    remote
        .set("it:expiring", b"v".to_vec(), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(remote.get("it:expiring").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(remote.get("it:expiring").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn remote_tier_batch_round_trip() {
    let remote = RedisRemote::new(pool().await);

    remote
        .set_many(
            vec![
                ("it:b1".to_string(), b"1".to_vec()),
                ("it:b2".to_string(), b"2".to_vec()),
            ],
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let keys: Vec<String> = ["it:b1", "it:b2", "it:b3"].map(String::from).into();
    let found: HashMap<String, Vec<u8>> = remote.get_many(&keys).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found.get("it:b1"), Some(&b"1".to_vec()));
    assert!(!found.contains_key("it:b3"));
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn lock_is_mutually_exclusive() {
    let a = RedisLockManager::new(pool().await);
    let b = RedisLockManager::new(pool().await);
    let lease = Duration::from_secs(10);

    assert!(a.try_lock("it:lock", Duration::ZERO, lease).await.unwrap());
    assert!(!b.try_lock("it:lock", Duration::ZERO, lease).await.unwrap());

    a.unlock("it:lock").await.unwrap();
    assert!(b.try_lock("it:lock", Duration::ZERO, lease).await.unwrap());
    b.unlock("it:lock").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn stale_unlock_does_not_release_new_holder() {
    let a = RedisLockManager::new(pool().await);
    let b = RedisLockManager::new(pool().await);

    assert!(
        a.try_lock("it:stale-lock", Duration::ZERO, Duration::from_millis(100))
            .await
            .unwrap()
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A's lease expired; B takes the lock.
    assert!(
        b.try_lock("it:stale-lock", Duration::ZERO, Duration::from_secs(10))
            .await
            .unwrap()
    );

    // A's unlock must be a no-op now (token mismatch).
    a.unlock("it:stale-lock").await.unwrap();
    let c = RedisLockManager::new(pool().await);
    assert!(
        !c.try_lock("it:stale-lock", Duration::ZERO, Duration::from_secs(10))
            .await
            .unwrap()
    );
    b.unlock("it:stale-lock").await.unwrap();
}

struct Recorder {
    received: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait::async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, payload: &[u8]) {
        let _ = self.received.send(payload.to_vec());
    }
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn bus_delivers_published_payloads() {
    let url = get_redis_url().await;
    let bus = RedisBus::new(pool().await, url);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = bus
        .subscribe("it:channel", Arc::new(Recorder { received: tx }))
        .await
        .unwrap();

    // Give the subscriber loop a moment to attach.
    tokio::time::sleep(Duration::from_millis(300)).await;

    bus.publish("it:channel", b"hello".to_vec()).await.unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery within 5s")
        .expect("channel open");
    assert_eq!(payload, b"hello");

    bus.unsubscribe("it:channel", id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn filter_store_swap_is_atomic_rename() {
    let store = RedisFilterStore::new(pool().await);

    store.set_bits("it:filter", &[1, 2, 3]).await.unwrap();
    assert!(store.test_bits("it:filter", &[1, 2, 3]).await.unwrap());

    store.ensure("it:filter:staging", 1024).await.unwrap();
    store.set_bits("it:filter:staging", &[9]).await.unwrap();
    store.swap("it:filter:staging", "it:filter").await.unwrap();

    assert!(store.test_bits("it:filter", &[9]).await.unwrap());
    assert!(!store.test_bits("it:filter", &[1]).await.unwrap());

    store.remove("it:filter").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn filter_store_counts_flipped_bits() {
    let store = RedisFilterStore::new(pool().await);

    let flipped = store.set_bits("it:flips", &[10, 11]).await.unwrap();
    assert_eq!(flipped, 2);
    let flipped = store.set_bits("it:flips", &[10, 12]).await.unwrap();
    assert_eq!(flipped, 1);

    store.remove("it:flips").await.unwrap();
}
