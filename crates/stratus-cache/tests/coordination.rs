//! Integration tests for the coordination engine.
//!
//! A "fleet" here is several cache contexts sharing one embedded remote
//! tier, pub/sub bus and lock table — the same topology as multiple server
//! instances sharing Redis, but deterministic and in-process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use stratus_cache::{
    BroadcastMessage, CacheConfig, CacheContext, CacheError, LocalTierSettings, MemoryBus,
    MemoryFilterStore, MemoryLockTable, MemoryRemote, MessageKind, RefreshPolicy,
    RemoteTierSettings, TieredCache, context::DEFAULT_BROADCAST_CHANNEL,
};
use stratus_core::PubSubChannel;

struct Fleet {
    remote: MemoryRemote,
    bus: MemoryBus,
    locks: MemoryLockTable,
    filters: MemoryFilterStore,
}

impl Fleet {
    fn new() -> Self {
        Self {
            remote: MemoryRemote::new(),
            bus: MemoryBus::new(),
            locks: MemoryLockTable::new(),
            filters: MemoryFilterStore::new(),
        }
    }

    /// A context wired like one server instance of the fleet.
    fn instance(&self) -> Arc<CacheContext> {
        CacheContext::builder()
            .with_remote(Arc::new(self.remote.clone()))
            .with_bus(Arc::new(self.bus.clone()))
            .with_lock(Arc::new(self.locks.handle()))
            .with_filter_store(Arc::new(self.filters.clone()))
            .build()
    }
}

fn two_tier_config(name: &str) -> CacheConfig {
    CacheConfig::new(name)
        .with_local(LocalTierSettings::default())
        .with_remote(RemoteTierSettings::default())
}

async fn build_cache(ctx: &Arc<CacheContext>, config: CacheConfig) -> TieredCache<String, String> {
    ctx.cache::<String, String>(config)
        .display_keys()
        .msgpack_values()
        .build()
        .await
        .expect("build cache")
}

/// Give spawned bus handlers a moment to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn absent_key_without_loader_is_a_miss() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let cache = build_cache(&ctx, two_tier_config("orders")).await;

    assert_eq!(cache.get(&"nope".to_string()).await.unwrap(), None);
    assert_eq!(cache.get(&"nope".to_string()).await.unwrap(), None);

    // Both reads fell through every tier; nothing was backfilled.
    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.local_hits + stats.remote_hits, 0);
}

#[tokio::test]
async fn write_then_read_own_write_multi_tier() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let cache = build_cache(&ctx, two_tier_config("orders")).await;

    cache.put(&"1".to_string(), "alpha".to_string()).await.unwrap();
    assert_eq!(
        cache.get(&"1".to_string()).await.unwrap(),
        Some("alpha".to_string())
    );
    assert_eq!(cache.stats().local_hits, 1);
}

#[tokio::test]
async fn write_then_read_own_write_local_only() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let config = CacheConfig::new("sessions").with_local(LocalTierSettings::default());
    let cache = build_cache(&ctx, config).await;

    cache.put(&"s".to_string(), "tok".to_string()).await.unwrap();
    assert_eq!(
        cache.get(&"s".to_string()).await.unwrap(),
        Some("tok".to_string())
    );
}

#[tokio::test]
async fn write_then_read_own_write_remote_only() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let config = CacheConfig::new("blobs").with_remote(RemoteTierSettings::default());
    let cache = build_cache(&ctx, config).await;

    cache.put(&"b".to_string(), "bytes".to_string()).await.unwrap();
    assert_eq!(
        cache.get(&"b".to_string()).await.unwrap(),
        Some("bytes".to_string())
    );
    assert_eq!(cache.stats().remote_hits, 1);
}

#[tokio::test]
async fn remote_hit_backfills_local_tier() {
    let fleet = Fleet::new();
    let writer_ctx = fleet.instance();
    let reader_ctx = fleet.instance();
    let writer = build_cache(&writer_ctx, two_tier_config("orders")).await;
    let reader = build_cache(&reader_ctx, two_tier_config("orders")).await;

    writer.put(&"7".to_string(), "seven".to_string()).await.unwrap();

    // First read on the other instance comes from the remote tier...
    assert_eq!(
        reader.get(&"7".to_string()).await.unwrap(),
        Some("seven".to_string())
    );
    assert_eq!(reader.stats().remote_hits, 1);

    // ...and the backfill makes the second read a local hit.
    assert_eq!(
        reader.get(&"7".to_string()).await.unwrap(),
        Some("seven".to_string())
    );
    assert_eq!(reader.stats().local_hits, 1);
    assert_eq!(reader.stats().remote_hits, 1);
}

#[tokio::test]
async fn loader_populates_both_tiers_on_double_miss() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let cache = ctx
        .cache::<String, String>(two_tier_config("products"))
        .display_keys()
        .msgpack_values()
        .load_with(move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(Some(format!("loaded-{key}")))
            }
        })
        .build()
        .await
        .unwrap();

    assert_eq!(
        cache.get(&"p1".to_string()).await.unwrap(),
        Some("loaded-p1".to_string())
    );
    assert_eq!(calls.load(Ordering::Relaxed), 1);

    // Now served from the local tier, not the loader.
    assert_eq!(
        cache.get(&"p1".to_string()).await.unwrap(),
        Some("loaded-p1".to_string())
    );
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(cache.stats().local_hits, 1);
}

#[tokio::test]
async fn loader_absent_results_are_not_stored() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let cache = ctx
        .cache::<String, String>(two_tier_config("products"))
        .display_keys()
        .msgpack_values()
        .load_with(move |_key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        })
        .build()
        .await
        .unwrap();

    assert_eq!(cache.get(&"ghost".to_string()).await.unwrap(), None);
    assert_eq!(cache.get(&"ghost".to_string()).await.unwrap(), None);
    // No nil entry was cached: the loader ran both times.
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn loader_failure_degrades_to_absent() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();

    let cache = ctx
        .cache::<String, String>(two_tier_config("products"))
        .display_keys()
        .msgpack_values()
        .load_with(|_key: String| async move { anyhow::bail!("system of record is down") })
        .build()
        .await
        .unwrap();

    assert_eq!(cache.get(&"p1".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn get_all_mixes_tiers_and_batch_loader() {
    let fleet = Fleet::new();
    let writer_ctx = fleet.instance();
    let reader_ctx = fleet.instance();
    let writer = build_cache(&writer_ctx, two_tier_config("orders")).await;

    writer.put(&"remote".to_string(), "from-remote".to_string()).await.unwrap();

    let reader = reader_ctx
        .cache::<String, String>(two_tier_config("orders"))
        .display_keys()
        .msgpack_values()
        .load_with(|key: String| async move {
            if key == "loadable" {
                Ok(Some("from-loader".to_string()))
            } else {
                Ok(None)
            }
        })
        .build()
        .await
        .unwrap();

    reader.put(&"local".to_string(), "from-local".to_string()).await.unwrap();

    let keys: Vec<String> = ["local", "remote", "loadable", "missing"]
        .into_iter()
        .map(String::from)
        .collect();
    let result = reader.get_all(&keys).await.unwrap();

    assert_eq!(result.get("local"), Some(&"from-local".to_string()));
    assert_eq!(result.get("remote"), Some(&"from-remote".to_string()));
    assert_eq!(result.get("loadable"), Some(&"from-loader".to_string()));
    // Keys nothing produced a value for are absent, never null entries.
    assert!(!result.contains_key("missing"));
    assert_eq!(result.len(), 3);

    // The loaded value was backfilled: a second batch read needs no loader.
    let again = reader.get_all(&keys).await.unwrap();
    assert_eq!(again.len(), 3);
    assert_eq!(again.get("loadable"), Some(&"from-loader".to_string()));
}

#[tokio::test]
async fn cross_instance_invalidation() {
    let fleet = Fleet::new();
    let a_ctx = fleet.instance();
    let b_ctx = fleet.instance();
    let a = build_cache(&a_ctx, two_tier_config("orders").with_sync()).await;
    let b = build_cache(&b_ctx, two_tier_config("orders").with_sync()).await;

    a.put(&"k".to_string(), "v1".to_string()).await.unwrap();
    settle().await;

    // B has the value cached locally.
    assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some("v1".to_string()));
    assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some("v1".to_string()));
    assert!(b.stats().local_hits >= 1);

    a.remove(&"k".to_string()).await.unwrap();
    settle().await;

    // The remote delete happened on A; the broadcast cleared B's local tier.
    assert_eq!(b.get(&"k".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn cross_instance_update_propagates_to_local_tiers() {
    let fleet = Fleet::new();
    let a_ctx = fleet.instance();
    let b_ctx = fleet.instance();
    let a = build_cache(&a_ctx, two_tier_config("orders").with_sync()).await;
    let b = build_cache(&b_ctx, two_tier_config("orders").with_sync()).await;

    a.put(&"k".to_string(), "v1".to_string()).await.unwrap();
    settle().await;
    assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some("v1".to_string()));

    a.put(&"k".to_string(), "v2".to_string()).await.unwrap();
    settle().await;

    // B serves the new value from its local tier without a remote read.
    let remote_hits_before = b.stats().remote_hits;
    assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some("v2".to_string()));
    assert_eq!(b.stats().remote_hits, remote_hits_before);
}

#[tokio::test]
async fn echo_suppression_ignores_own_instance_id() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let cache = build_cache(&ctx, two_tier_config("orders").with_sync()).await;

    cache.put(&"k".to_string(), "mine".to_string()).await.unwrap();
    settle().await;

    // A crafted invalidation carrying this instance's own id must be
    // discarded even though it names a key in the local tier.
    let echo = BroadcastMessage {
        origin: ctx.instance_id().expect("sync is wired"),
        cache: "orders".to_string(),
        kind: MessageKind::Invalidate {
            keys: vec!["orders:k".to_string()],
        },
    };
    fleet
        .bus
        .publish(DEFAULT_BROADCAST_CHANNEL, rmp_serde::to_vec(&echo).unwrap())
        .await
        .unwrap();
    settle().await;

    // Still a local hit: the echo was not applied.
    assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some("mine".to_string()));
    assert_eq!(cache.stats().local_hits, 1);

    // The same message from a foreign origin is applied.
    let foreign = BroadcastMessage {
        origin: uuid::Uuid::new_v4(),
        ..echo
    };
    fleet
        .bus
        .publish(DEFAULT_BROADCAST_CHANNEL, rmp_serde::to_vec(&foreign).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(cache.get(&"k".to_string()).await.unwrap(), Some("mine".to_string()));
    // Served from the remote tier this time: the local entry was dropped.
    assert_eq!(cache.stats().remote_hits, 1);
}

#[tokio::test]
async fn refresh_reloads_hot_keys() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let config = two_tier_config("quotes")
        .with_refresh(RefreshPolicy::new(Duration::from_millis(100)));
    let cache = ctx
        .cache::<String, String>(config)
        .display_keys()
        .msgpack_values()
        .load_with(move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(Some(format!("{key}-v{n}")))
            }
        })
        .build()
        .await
        .unwrap();

    // Double miss loads v1 and arms nothing yet (arming happens on hits).
    assert_eq!(
        cache.get(&"q".to_string()).await.unwrap(),
        Some("q-v1".to_string())
    );
    // The hit arms the refresh task.
    assert_eq!(
        cache.get(&"q".to_string()).await.unwrap(),
        Some("q-v1".to_string())
    );
    assert_eq!(cache.refresh_task_count(), 1);

    tokio::time::sleep(Duration::from_millis(350)).await;

    // Background refreshes replaced the value without any reader missing.
    let value = cache.get(&"q".to_string()).await.unwrap().unwrap();
    assert_ne!(value, "q-v1");
    assert!(calls.load(Ordering::Relaxed) >= 2);

    cache.close().await;
    assert_eq!(cache.refresh_task_count(), 0);
}

#[tokio::test]
async fn refresh_runs_on_one_instance_per_cycle() {
    let fleet = Fleet::new();
    let a_ctx = fleet.instance();
    let b_ctx = fleet.instance();

    let a_calls = Arc::new(AtomicU32::new(0));
    let b_calls = Arc::new(AtomicU32::new(0));

    let config = two_tier_config("rates")
        .with_refresh(RefreshPolicy::new(Duration::from_millis(200)));

    let a_counter = Arc::clone(&a_calls);
    let a = a_ctx
        .cache::<String, String>(config.clone())
        .display_keys()
        .msgpack_values()
        .load_with(move |key: String| {
            let counter = Arc::clone(&a_counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(Some(format!("{key}-from-a")))
            }
        })
        .build()
        .await
        .unwrap();

    let b_counter = Arc::clone(&b_calls);
    let b = b_ctx
        .cache::<String, String>(config)
        .display_keys()
        .msgpack_values()
        .load_with(move |key: String| {
            let counter = Arc::clone(&b_counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(Some(format!("{key}-from-b")))
            }
        })
        .build()
        .await
        .unwrap();

    a.put(&"usd".to_string(), "seed".to_string()).await.unwrap();

    // Read hits on both instances arm one timer each.
    assert!(a.get(&"usd".to_string()).await.unwrap().is_some());
    assert!(b.get(&"usd".to_string()).await.unwrap().is_some());
    assert_eq!(a.refresh_task_count(), 1);
    assert_eq!(b.refresh_task_count(), 1);

    tokio::time::sleep(Duration::from_millis(450)).await;
    a.close().await;
    b.close().await;

    let total = a_calls.load(Ordering::Relaxed) + b_calls.load(Ordering::Relaxed);
    // Both timers fired in each ~200ms window, but the shared timestamp +
    // zero-wait lock let at most one instance per window pay the loader.
    assert!(total >= 1, "at least one refresh should have run");
    assert!(total <= 3, "expected at most one loader call per window, got {total}");
}

#[tokio::test]
async fn refresh_task_is_collected_once_key_goes_cold() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();

    let config = CacheConfig::new("sessions")
        .with_local(LocalTierSettings::default())
        .with_refresh(
            RefreshPolicy::new(Duration::from_millis(50))
                .with_stale_after_access(Duration::from_millis(100)),
        );
    let cache = ctx
        .cache::<String, String>(config)
        .display_keys()
        .load_with(|key: String| async move { Ok(Some(format!("{key}-fresh"))) })
        .build()
        .await
        .unwrap();

    cache.put(&"s1".to_string(), "v".to_string()).await.unwrap();
    assert!(cache.get(&"s1".to_string()).await.unwrap().is_some());
    assert_eq!(cache.refresh_task_count(), 1);

    // No reads for well past the staleness bound: the task cancels itself
    // on a subsequent firing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.refresh_task_count(), 0);

    // A new read hit creates a fresh task rather than resurrecting state.
    assert!(cache.get(&"s1".to_string()).await.unwrap().is_some());
    assert_eq!(cache.refresh_task_count(), 1);

    cache.close().await;
}

#[tokio::test]
async fn cache_lookup_by_name_is_idempotent() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();

    let first = build_cache(&ctx, two_tier_config("orders")).await;
    let second = build_cache(&ctx, two_tier_config("orders")).await;
    assert_eq!(ctx.cache_count(), 1);

    first.put(&"k".to_string(), "v".to_string()).await.unwrap();
    // Same instance: the write is visible through the other handle's stats.
    assert_eq!(second.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
    assert_eq!(first.stats().local_hits, 1);
}

#[tokio::test]
async fn cache_name_with_other_types_is_rejected() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let _orders = build_cache(&ctx, two_tier_config("orders")).await;

    let err = ctx
        .cache::<String, u64>(two_tier_config("orders"))
        .display_keys()
        .msgpack_values()
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::TypeMismatch { .. }));
}

#[tokio::test]
async fn closed_cache_rejects_operations() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let cache = build_cache(&ctx, two_tier_config("orders")).await;

    cache.close().await;
    cache.close().await; // idempotent

    let err = cache.get(&"k".to_string()).await.unwrap_err();
    assert!(matches!(err, CacheError::Closed { .. }));
    let err = cache.put(&"k".to_string(), "v".to_string()).await.unwrap_err();
    assert!(matches!(err, CacheError::Closed { .. }));
}

#[tokio::test]
async fn context_close_shuts_down_every_cache() {
    let fleet = Fleet::new();
    let ctx = fleet.instance();
    let orders = build_cache(&ctx, two_tier_config("orders").with_sync()).await;
    let users = build_cache(&ctx, two_tier_config("users")).await;

    ctx.close().await;

    assert!(orders.get(&"k".to_string()).await.is_err());
    assert!(users.get(&"k".to_string()).await.is_err());
}

#[tokio::test]
async fn shared_filter_is_visible_across_instances() {
    let fleet = Fleet::new();
    let a_ctx = fleet.instance();
    let b_ctx = fleet.instance();

    let config = stratus_cache::FilterConfig {
        expected_insertions: 10_000,
        false_positive_probability: 0.001,
    };
    let a = a_ctx.filter("known-users", &config).unwrap();
    let b = b_ctx.filter("known-users", &config).unwrap();

    a.add("user:1").await.unwrap();
    assert!(b.might_contain("user:1").await.unwrap());
    assert!(!b.might_contain("user:2").await.unwrap());

    // A rebuild on one instance atomically replaces membership for all.
    a.rebuild(&["user:2", "user:3"]).await.unwrap();
    assert!(b.might_contain("user:2").await.unwrap());
    assert!(b.might_contain("user:3").await.unwrap());
    assert!(!b.might_contain("user:1").await.unwrap());
}
