//! Tiered cache coordinator.
//!
//! Composes an optional local tier, an optional remote tier, an optional
//! loader, broadcast sync and refresh-ahead into one logical cache. Each
//! capability is either present or absent on the assembled coordinator,
//! fixed at construction by [`CacheBuilder`](crate::builder::CacheBuilder)
//! — single-tier variants are the same type with the other tier unset.
//!
//! ## Read path
//!
//! local tier → remote tier (backfilling local) → loader (backfilling
//! both). Every tier hit arms or touches the key's refresh task.
//!
//! ## Write path
//!
//! Remote tier first, then local, then broadcast. Remote-first ordering
//! means a concurrent remote-only reader on another instance never
//! observes a value this instance has not durably stored remotely.
//!
//! ## Error surface
//!
//! Remote tier failures propagate to the caller — they represent loss of
//! the tier the caller explicitly asked for. Loader failures are caught
//! and logged, degrading to an absent result. Broadcast failures never
//! reach the caller.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use stratus_core::{
    CacheError, DistributedLock, KeyEncoder, Loader, LocalTier, RemoteTier, ValueCodec,
};

use crate::broadcast::{Broadcaster, MessageKind, SyncTarget};
use crate::config::CacheConfig;
use crate::metrics;
use crate::refresh::RefreshScheduler;

/// Snapshot of a cache's operation counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Hits served from the local tier.
    pub local_hits: u64,
    /// Hits served from the remote tier.
    pub remote_hits: u64,
    /// Reads no tier could serve.
    pub misses: u64,
    /// Loader invocations that produced a value.
    pub loads: u64,
}

#[derive(Default)]
pub(crate) struct StatCounters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

/// One logical cache composed of up to two tiers.
///
/// Cheaply cloneable — clones share the same underlying state. Obtained
/// from [`CacheContext::cache`](crate::context::CacheContext::cache);
/// lookups under the same name return the same instance.
pub struct TieredCache<K, V> {
    pub(crate) inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for TieredCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for TieredCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct CacheInner<K, V> {
    pub(crate) config: CacheConfig,
    pub(crate) key_encoder: Arc<dyn KeyEncoder<K>>,
    pub(crate) codec: Option<Arc<dyn ValueCodec<V>>>,
    pub(crate) local: Option<Arc<dyn LocalTier<V>>>,
    pub(crate) remote: Option<Arc<dyn RemoteTier>>,
    pub(crate) lock: Option<Arc<dyn DistributedLock>>,
    pub(crate) loader: Option<Arc<dyn Loader<K, V>>>,
    pub(crate) broadcaster: Option<Arc<Broadcaster>>,
    pub(crate) refresh: Option<RefreshScheduler>,
    pub(crate) stats: StatCounters,
    pub(crate) closed: AtomicBool,
}

impl<K, V> CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn cache_key(&self, key: &K) -> String {
        format!("{}:{}", self.config.name, self.key_encoder.encode(key))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            Err(CacheError::closed(&self.config.name))
        } else {
            Ok(())
        }
    }

    fn codec(&self) -> Result<&dyn ValueCodec<V>, CacheError> {
        self.codec.as_deref().ok_or_else(|| {
            CacheError::configuration(format!("cache {} has no value codec", self.config.name))
        })
    }

    fn sync_active(&self) -> bool {
        self.config.sync_enabled && self.broadcaster.is_some()
    }

    fn arm_refresh(self: &Arc<Self>, key: &K, cache_key: &str) {
        if let Some(scheduler) = &self.refresh {
            scheduler.arm(self, key, cache_key);
        }
    }

    pub(crate) async fn get(self: &Arc<Self>, key: &K) -> Result<Option<V>, CacheError> {
        self.ensure_open()?;
        let ck = self.cache_key(key);

        if let Some(local) = &self.local {
            if let Some(value) = local.get(&ck) {
                debug!(key = %ck, "cache hit (local)");
                metrics::record_cache_hit("local");
                self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                self.arm_refresh(key, &ck);
                return Ok(Some(value));
            }
        }

        if let Some(remote) = &self.remote {
            if let Some(bytes) = remote.get(&ck).await? {
                match self.codec()?.decode(&bytes) {
                    Ok(value) => {
                        debug!(key = %ck, "cache hit (remote)");
                        metrics::record_cache_hit("remote");
                        self.stats.remote_hits.fetch_add(1, Ordering::Relaxed);
                        if let Some(local) = &self.local {
                            local.put(ck.clone(), value.clone());
                        }
                        self.arm_refresh(key, &ck);
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        warn!(key = %ck, error = %e, "failed to decode cached value; treating as miss");
                    }
                }
            }
        }

        debug!(key = %ck, "cache miss");
        metrics::record_cache_miss();
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let Some(loader) = &self.loader else {
            return Ok(None);
        };
        match loader.load(key).await {
            Ok(Some(value)) => {
                metrics::record_cache_load();
                self.stats.loads.fetch_add(1, Ordering::Relaxed);
                self.write_entries(vec![(ck, value.clone())], false).await?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(key = %ck, error = %e, "loader failed; returning absent");
                Ok(None)
            }
        }
    }

    pub(crate) async fn get_all(self: &Arc<Self>, keys: &[K]) -> Result<HashMap<K, V>, CacheError> {
        self.ensure_open()?;
        let keyed: Vec<(K, String)> = keys
            .iter()
            .map(|key| (key.clone(), self.cache_key(key)))
            .collect();
        let mut result = HashMap::with_capacity(keyed.len());

        if let Some(local) = &self.local {
            let cache_keys: Vec<String> = keyed.iter().map(|(_, ck)| ck.clone()).collect();
            let found = local.get_many(&cache_keys);
            for (key, ck) in &keyed {
                if let Some(value) = found.get(ck) {
                    self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
                    self.arm_refresh(key, ck);
                    result.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(remote) = &self.remote {
            let missing: Vec<&(K, String)> = keyed
                .iter()
                .filter(|(key, _)| !result.contains_key(key))
                .collect();
            if !missing.is_empty() {
                let cache_keys: Vec<String> = missing.iter().map(|(_, ck)| ck.clone()).collect();
                let found = remote.get_many(&cache_keys).await?;
                let mut backfill = Vec::with_capacity(found.len());
                for (key, ck) in missing {
                    let Some(bytes) = found.get(ck) else { continue };
                    match self.codec()?.decode(bytes) {
                        Ok(value) => {
                            self.stats.remote_hits.fetch_add(1, Ordering::Relaxed);
                            backfill.push((ck.clone(), value.clone()));
                            self.arm_refresh(key, ck);
                            result.insert(key.clone(), value);
                        }
                        Err(e) => {
                            warn!(key = %ck, error = %e, "failed to decode cached value; treating as miss");
                        }
                    }
                }
                if let Some(local) = &self.local {
                    if !backfill.is_empty() {
                        local.put_many(backfill);
                    }
                }
            }
        }

        let still_missing: Vec<K> = keyed
            .iter()
            .filter(|(key, _)| !result.contains_key(key))
            .map(|(key, _)| key.clone())
            .collect();
        self.stats
            .misses
            .fetch_add(still_missing.len() as u64, Ordering::Relaxed);

        if !still_missing.is_empty() {
            if let Some(loader) = &self.loader {
                match loader.load_many(&still_missing).await {
                    Ok(loaded) if !loaded.is_empty() => {
                        self.stats
                            .loads
                            .fetch_add(loaded.len() as u64, Ordering::Relaxed);
                        let entries: Vec<(String, V)> = loaded
                            .iter()
                            .map(|(key, value)| (self.cache_key(key), value.clone()))
                            .collect();
                        self.write_entries(entries, false).await?;
                        result.extend(loaded);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(cache = %self.config.name, error = %e, "batch loader failed; returning partial result");
                    }
                }
            }
        }

        Ok(result)
    }

    pub(crate) async fn put(&self, key: &K, value: V) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.write_entries(vec![(self.cache_key(key), value)], true)
            .await
    }

    pub(crate) async fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries
            .into_iter()
            .map(|(key, value)| (self.cache_key(&key), value))
            .collect();
        self.write_entries(entries, true).await
    }

    pub(crate) async fn remove(&self, key: &K) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.remove_entries(vec![self.cache_key(key)]).await
    }

    pub(crate) async fn remove_all(&self, keys: &[K]) -> Result<(), CacheError> {
        self.ensure_open()?;
        if keys.is_empty() {
            return Ok(());
        }
        let cache_keys = keys.iter().map(|key| self.cache_key(key)).collect();
        self.remove_entries(cache_keys).await
    }

    /// Write-through: remote first, then local, then (optionally) an
    /// UPDATE broadcast. Load-on-miss backfills pass `broadcast = false` —
    /// loaded values are not this instance's mutation.
    pub(crate) async fn write_entries(
        &self,
        entries: Vec<(String, V)>,
        broadcast: bool,
    ) -> Result<(), CacheError> {
        let sync = broadcast && self.sync_active();
        let need_bytes = self.remote.is_some() || sync;

        let encoded: Vec<(String, Vec<u8>)> = if need_bytes {
            let codec = self.codec()?;
            let mut out = Vec::with_capacity(entries.len());
            for (ck, value) in &entries {
                out.push((ck.clone(), codec.encode(value)?));
            }
            out
        } else {
            Vec::new()
        };

        if let Some(remote) = &self.remote {
            let ttl = self
                .config
                .remote
                .as_ref()
                .map(|settings| settings.ttl())
                .unwrap_or_default();
            if encoded.len() == 1 {
                let (ck, bytes) = &encoded[0];
                remote.set(ck, bytes.clone(), ttl).await?;
            } else {
                remote.set_many(encoded.clone(), ttl).await?;
            }
        }

        if let Some(local) = &self.local {
            local.put_many(entries);
        }

        if sync {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster
                    .publish(&self.config.name, MessageKind::Update { entries: encoded })
                    .await;
            }
        }

        Ok(())
    }

    /// Delete from remote, then local, then broadcast an INVALIDATE.
    async fn remove_entries(&self, cache_keys: Vec<String>) -> Result<(), CacheError> {
        if let Some(remote) = &self.remote {
            if cache_keys.len() == 1 {
                remote.delete(&cache_keys[0]).await?;
            } else {
                remote.delete_many(&cache_keys).await?;
            }
        }

        if let Some(local) = &self.local {
            local.invalidate_many(&cache_keys);
        }

        if self.sync_active() {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster
                    .publish(&self.config.name, MessageKind::Invalidate { keys: cache_keys })
                    .await;
            }
        }

        Ok(())
    }

    /// Copy the current remote value into the local tier without invoking
    /// the loader — used when another instance refreshed recently.
    pub(crate) async fn pull_remote_into_local(&self, cache_key: &str) -> Result<(), CacheError> {
        let (Some(remote), Some(local)) = (&self.remote, &self.local) else {
            return Ok(());
        };
        if let Some(bytes) = remote.get(cache_key).await? {
            let value = self.codec()?.decode(&bytes)?;
            local.put(cache_key.to_string(), value);
        }
        Ok(())
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(scheduler) = &self.refresh {
            scheduler.cancel_all();
        }
        if self.config.sync_enabled {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.unregister(&self.config.name).await;
            }
        }
        info!(cache = %self.config.name, "cache closed");
    }
}

impl<K, V> SyncTarget for CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn sync_enabled(&self) -> bool {
        self.config.sync_enabled && !self.is_closed()
    }

    fn apply_update(&self, entries: &[(String, Vec<u8>)]) {
        let Some(local) = &self.local else { return };
        let Ok(codec) = self.codec() else { return };
        for (ck, bytes) in entries {
            match codec.decode(bytes) {
                Ok(value) => local.put(ck.clone(), value),
                Err(e) => {
                    warn!(key = %ck, error = %e, "failed to decode broadcast value; invalidating local entry");
                    local.invalidate(ck);
                }
            }
        }
    }

    fn apply_invalidate(&self, keys: &[String]) {
        if let Some(local) = &self.local {
            local.invalidate_many(keys);
        }
    }
}

impl<K, V> TieredCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// The cache's logical name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration this cache was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read a value.
    ///
    /// Walks local tier → remote tier → loader, backfilling the faster
    /// tiers on the way back. Returns `Ok(None)` when nothing produced a
    /// value — including when the loader failed, which is logged rather
    /// than propagated.
    ///
    /// # Errors
    ///
    /// Remote tier failures propagate; see the module docs for the full
    /// error surface.
    pub async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.inner.get(key).await
    }

    /// Batch read with the same tiering policy as [`get`](Self::get),
    /// applied per key in three batched passes. Keys nothing produced a
    /// value for are absent from the result — never present as nulls.
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>, CacheError> {
        self.inner.get_all(keys).await
    }

    /// Write a value through both tiers and broadcast the update.
    pub async fn put(&self, key: &K, value: V) -> Result<(), CacheError> {
        self.inner.put(key, value).await
    }

    /// Batch write.
    pub async fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError> {
        self.inner.put_all(entries).await
    }

    /// Remove a key from both tiers and broadcast the invalidation.
    pub async fn remove(&self, key: &K) -> Result<(), CacheError> {
        self.inner.remove(key).await
    }

    /// Batch remove.
    pub async fn remove_all(&self, keys: &[K]) -> Result<(), CacheError> {
        self.inner.remove_all(keys).await
    }

    /// Cancel all refresh tasks and release the broadcast registration.
    /// Idempotent; subsequent operations fail with
    /// [`CacheError::Closed`].
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Snapshot of this cache's operation counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Number of keys currently holding a refresh task.
    pub fn refresh_task_count(&self) -> usize {
        self.inner
            .refresh
            .as_ref()
            .map(|scheduler| scheduler.task_count())
            .unwrap_or(0)
    }
}
