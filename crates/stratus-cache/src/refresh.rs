//! Refresh-ahead scheduling for hot keys.
//!
//! A key becomes "hot" on its first read hit: the scheduler creates a
//! per-key task that re-invokes the loader on a fixed cadence, so the
//! value is replaced before it expires instead of stampeding the system of
//! record when many readers miss at once.
//!
//! ## Task lifecycle
//!
//! ```text
//! read hit ──► task created (compute-if-absent) ──► fires every interval
//!                  │                                      │
//!                  └── further read hits touch            ├── idle past staleness bound → cancelled
//!                      last-access, nothing else          ├── loader/config gone → cancelled
//!                                                         └── cache closed / dropped → stops
//! ```
//!
//! ## Fleet coordination
//!
//! For a cache backed by a shared remote tier, every instance's timer
//! fires independently. Two levels keep the loader from running more than
//! once per interval across the fleet: a cheap shared "last refreshed at"
//! timestamp probe, then a zero-wait distributed lock for the instances
//! that found the timestamp stale. Losers back off entirely — the timer
//! retries next interval — and instances that skip the load still copy the
//! remote value down into their local tier, converging for free.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use stratus_core::{CacheError, DistributedLock, Loader, RemoteTier};

use crate::config::RefreshPolicy;
use crate::coordinator::CacheInner;
use crate::metrics;

/// Per-cache refresh task table.
pub(crate) struct RefreshScheduler {
    policy: RefreshPolicy,
    tasks: DashMap<String, RefreshTask>,
}

struct RefreshTask {
    last_access: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    pub(crate) fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            tasks: DashMap::new(),
        }
    }

    /// Arm a refresh task for `cache_key`, or touch its last-access time
    /// if one already runs. Creation is compute-if-absent: concurrent read
    /// hits on the same key produce exactly one timer.
    pub(crate) fn arm<K, V>(&self, cache: &Arc<CacheInner<K, V>>, key: &K, cache_key: &str)
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match self.tasks.entry(cache_key.to_string()) {
            Entry::Occupied(task) => {
                task.get().last_access.store(now_millis(), Ordering::Relaxed);
            }
            Entry::Vacant(slot) => {
                let last_access = Arc::new(AtomicU64::new(now_millis()));
                let handle = tokio::spawn(run_refresh_loop(
                    Arc::downgrade(cache),
                    key.clone(),
                    cache_key.to_string(),
                    Arc::clone(&last_access),
                    self.policy.clone(),
                ));
                trace!(key = %cache_key, "armed refresh task");
                slot.insert(RefreshTask {
                    last_access,
                    handle,
                });
            }
        }
    }

    /// Drop a task entry without aborting it — called by a task loop that
    /// is cancelling itself and will return on its own.
    fn forget(&self, cache_key: &str) {
        self.tasks.remove(cache_key);
    }

    /// Abort every task. Called on cache close; timers must not keep the
    /// process alive.
    pub(crate) fn cancel_all(&self) {
        self.tasks.retain(|_, task| {
            task.handle.abort();
            false
        });
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn run_refresh_loop<K, V>(
    cache: Weak<CacheInner<K, V>>,
    key: K,
    cache_key: String,
    last_access: Arc<AtomicU64>,
    policy: RefreshPolicy,
) where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(policy.refresh_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval's first tick completes immediately; consume it so the
    // first refresh happens one full interval after the arming read.
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(cache) = cache.upgrade() else {
            return;
        };
        if cache.is_closed() {
            return;
        }

        let stale_after = policy.stale_after_access();
        if !stale_after.is_zero() {
            let idle_ms = now_millis().saturating_sub(last_access.load(Ordering::Relaxed));
            if idle_ms > stale_after.as_millis() as u64 {
                debug!(key = %cache_key, idle_ms, "key no longer hot; cancelling refresh task");
                metrics::record_refresh_cycle("cancelled_stale");
                if let Some(scheduler) = &cache.refresh {
                    scheduler.forget(&cache_key);
                }
                return;
            }
        }

        // The loader can be absent even though a policy is configured —
        // misconfiguration is detected here at fire time, not eagerly.
        let Some(loader) = cache.loader.clone() else {
            warn!(key = %cache_key, "refresh policy configured without a loader; cancelling task");
            if let Some(scheduler) = &cache.refresh {
                scheduler.forget(&cache_key);
            }
            return;
        };

        match (cache.remote.clone(), cache.lock.clone()) {
            (Some(remote), Some(lock)) => {
                refresh_shared(&cache, &remote, &lock, &loader, &key, &cache_key, &policy).await;
            }
            _ => {
                refresh_direct(&cache, &loader, &key, &cache_key).await;
            }
        }
    }
}

/// Refresh without fleet coordination: no shared remote tier (or no lock
/// collaborator), so this instance simply reloads and writes through.
async fn refresh_direct<K, V>(
    cache: &Arc<CacheInner<K, V>>,
    loader: &Arc<dyn Loader<K, V>>,
    key: &K,
    cache_key: &str,
) where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    match loader.load(key).await {
        Ok(Some(value)) => {
            if let Err(e) = cache.put(key, value).await {
                warn!(key = %cache_key, error = %e, "refresh write failed");
                metrics::record_refresh_cycle("skipped_error");
            } else {
                trace!(key = %cache_key, "refreshed value");
                metrics::record_refresh_cycle("refreshed");
            }
        }
        Ok(None) => {
            debug!(key = %cache_key, "loader returned absent during refresh; keeping cached value");
            metrics::record_refresh_cycle("refreshed");
        }
        Err(e) => {
            warn!(key = %cache_key, error = %e, "refresh loader failed");
            metrics::record_refresh_cycle("loader_failed");
        }
    }
}

/// Refresh with fleet coordination: probe the shared timestamp, then take
/// the zero-wait lock only if the timestamp is stale. Exactly one instance
/// per interval pays the loader call; the rest converge from the remote
/// value.
async fn refresh_shared<K, V>(
    cache: &Arc<CacheInner<K, V>>,
    remote: &Arc<dyn RemoteTier>,
    lock: &Arc<dyn DistributedLock>,
    loader: &Arc<dyn Loader<K, V>>,
    key: &K,
    cache_key: &str,
    policy: &RefreshPolicy,
) where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let ts_key = format!("{cache_key}:refresh-ts");
    let lock_name = format!("{cache_key}:refresh-lock");
    let interval = policy.refresh_interval();

    match remote.get(&ts_key).await {
        Ok(Some(bytes)) => {
            if let Some(refreshed_at) = parse_millis(&bytes) {
                let now = now_millis();
                if now < refreshed_at.saturating_add(interval.as_millis() as u64) {
                    trace!(key = %cache_key, "another instance refreshed recently; converging from remote");
                    metrics::record_refresh_cycle("converged");
                    if cache.local.is_some() {
                        if let Err(e) = cache.pull_remote_into_local(cache_key).await {
                            warn!(key = %cache_key, error = %e, "failed to copy remote value into local tier");
                        }
                    }
                    return;
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(key = %cache_key, error = %e, "refresh timestamp probe failed; skipping cycle");
            metrics::record_refresh_cycle("skipped_error");
            return;
        }
    }

    // Zero wait: if another instance is mid-refresh, back off entirely
    // rather than queueing behind it.
    match lock
        .try_lock(&lock_name, Duration::ZERO, policy.lock_lease_timeout())
        .await
    {
        Ok(true) => {
            let outcome: Result<(), CacheError> = async {
                match loader.load(key).await {
                    Ok(Some(value)) => {
                        cache.put(key, value).await?;
                    }
                    Ok(None) => {
                        debug!(key = %cache_key, "loader returned absent during refresh; keeping cached value");
                    }
                    Err(e) => {
                        warn!(key = %cache_key, error = %e, "refresh loader failed");
                        metrics::record_refresh_cycle("loader_failed");
                        // No timestamp write: let another instance retry
                        // sooner than a full suppression window.
                        return Ok(());
                    }
                }
                let stamp = now_millis().to_string().into_bytes();
                remote.set(&ts_key, stamp, interval * 2).await?;
                metrics::record_refresh_cycle("refreshed");
                Ok(())
            }
            .await;

            if let Err(e) = outcome {
                warn!(key = %cache_key, error = %e, "refresh write-back failed");
                metrics::record_refresh_cycle("skipped_error");
            }
            // Release even when the loader or the write failed.
            if let Err(e) = lock.unlock(&lock_name).await {
                warn!(key = %cache_key, error = %e, "failed to release refresh lock");
            }
        }
        Ok(false) => {
            trace!(key = %cache_key, "refresh lock contended; skipping cycle");
            metrics::record_refresh_cycle("lock_contended");
        }
        Err(e) => {
            warn!(key = %cache_key, error = %e, "refresh lock attempt failed; skipping cycle");
            metrics::record_refresh_cycle("skipped_error");
        }
    }
}

fn parse_millis(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
