//! In-process collaborator implementations.
//!
//! These back two deployment shapes:
//!
//! - **Single-instance mode**: a cache with no Redis at all still gets a
//!   working local tier, and an embedded remote/bus/lock set lets the rest
//!   of the engine run unchanged.
//! - **Tests**: cloning [`MemoryRemote`], [`MemoryBus`] and handles of
//!   [`MemoryLockTable`] across several coordinator instances simulates a
//!   multi-instance fleet inside one process, deterministically.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bus::{MessageHandler, PubSubChannel, SubscriptionId};
use crate::error::CacheError;
use crate::filter_store::FilterStore;
use crate::lock::DistributedLock;
use crate::tier::{LocalTier, RemoteTier};

/// A cached entry with TTL support.
#[derive(Clone, Debug)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
    ttl: Option<Duration>,
}

impl<V> CachedEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.cached_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Bounded, TTL-capable in-process tier over a `DashMap`.
///
/// Expired entries are collected lazily on read. When the tier is at
/// capacity, an arbitrary resident entry is evicted to make room — good
/// enough for a tier whose entries also age out; deployments that need a
/// real recency policy plug in their own [`LocalTier`].
pub struct MemoryTier<V> {
    entries: DashMap<String, CachedEntry<V>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl<V> MemoryTier<V> {
    /// Create a tier bounded to `capacity` entries, each living at most
    /// `ttl` (or forever when `None`).
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            default_ttl: ttl,
        }
    }

    fn evict_if_full(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        // Prefer reclaiming an expired entry before evicting a live one.
        let victim = self
            .entries
            .iter()
            .find(|e| e.value().is_expired())
            .or_else(|| self.entries.iter().next())
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::debug!(key = %key, "evicted local tier entry");
        }
    }
}

impl<V: Clone + Send + Sync> LocalTier<V> for MemoryTier<V> {
    fn get(&self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn get_many(&self, keys: &[String]) -> HashMap<String, V> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|v| (key.clone(), v)))
            .collect()
    }

    fn put(&self, key: String, value: V) {
        self.evict_if_full();
        self.entries
            .insert(key, CachedEntry::new(value, self.default_ttl));
    }

    fn put_many(&self, entries: Vec<(String, V)>) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn invalidate_many(&self, keys: &[String]) {
        for key in keys {
            self.entries.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone, Debug)]
struct RemoteEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl RemoteEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Instant::now() > at)
    }
}

/// Embedded [`RemoteTier`]: a shared byte store inside the process.
///
/// Clones share storage, so several coordinator instances can treat one
/// `MemoryRemote` as their common ground truth.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    entries: Arc<DashMap<String, RemoteEntry>>,
}

impl MemoryRemote {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Duration) -> Option<Instant> {
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

#[async_trait]
impl RemoteTier for MemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data.clone())),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(data) = self.get(key).await? {
                out.insert(key.clone(), data);
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            RemoteEntry {
                data: value,
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }
}

/// Embedded [`PubSubChannel`]: fan-out to in-process subscribers.
///
/// Handlers run on spawned tasks, so delivery is asynchronous relative to
/// the publisher — the same visibility model as a networked bus, minus the
/// network.
#[derive(Clone, Default)]
pub struct MemoryBus {
    channels: Arc<DashMap<String, DashMap<SubscriptionId, Arc<dyn MessageHandler>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSubChannel for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), CacheError> {
        let handlers: Vec<Arc<dyn MessageHandler>> = match self.channels.get(channel) {
            Some(subs) => subs.iter().map(|h| Arc::clone(h.value())).collect(),
            None => return Ok(()),
        };
        for handler in handlers {
            let payload = payload.clone();
            tokio::spawn(async move {
                handler.handle(&payload).await;
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, CacheError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id, handler);
        Ok(id)
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), CacheError> {
        if let Some(subs) = self.channels.get(channel) {
            subs.remove(&id);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct LockSlot {
    token: Uuid,
    expires_at: Instant,
}

/// Embedded [`DistributedLock`]: a lease table shared between handles.
///
/// Each handle tracks the tokens it acquired, so releasing a lock whose
/// lease already expired (and was re-acquired elsewhere) never disturbs
/// the new holder.
pub struct MemoryLockTable {
    slots: Arc<DashMap<String, LockSlot>>,
    held: DashMap<String, Uuid>,
}

impl Default for MemoryLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockTable {
    /// Create a fresh lock table.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            held: DashMap::new(),
        }
    }

    /// A new handle sharing this table's state, with its own ownership
    /// tracking — one handle per coordinator instance.
    pub fn handle(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            held: DashMap::new(),
        }
    }

    fn try_acquire(&self, name: &str, lease: Duration) -> Option<Uuid> {
        let token = Uuid::new_v4();
        let now = Instant::now();
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at > now {
                    None
                } else {
                    slot.insert(LockSlot {
                        token,
                        expires_at: now + lease,
                    });
                    Some(token)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(LockSlot {
                    token,
                    expires_at: now + lease,
                });
                Some(token)
            }
        }
    }
}

#[async_trait]
impl DistributedLock for MemoryLockTable {
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<bool, CacheError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(name, lease) {
                self.held.insert(name.to_string(), token);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn unlock(&self, name: &str) -> Result<(), CacheError> {
        if let Some((_, token)) = self.held.remove(name) {
            self.slots.remove_if(name, |_, slot| slot.token == token);
        }
        Ok(())
    }
}

/// Embedded [`FilterStore`]: named bit arrays behind one mutex.
///
/// The single mutex makes `swap` trivially atomic with respect to
/// concurrent readers, matching the rename guarantee the rebuild protocol
/// expects from a real store.
#[derive(Clone, Default)]
pub struct MemoryFilterStore {
    arrays: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryFilterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FilterStore for MemoryFilterStore {
    async fn ensure(&self, name: &str, nbits: u64) -> Result<(), CacheError> {
        let mut arrays = self.arrays.lock();
        arrays
            .entry(name.to_string())
            .or_insert_with(|| vec![0u8; (nbits as usize).div_ceil(8)]);
        Ok(())
    }

    async fn set_bits(&self, name: &str, offsets: &[u64]) -> Result<u64, CacheError> {
        let mut arrays = self.arrays.lock();
        let array = arrays.entry(name.to_string()).or_default();
        let mut flipped = 0;
        for &offset in offsets {
            let byte = (offset / 8) as usize;
            let bit = (offset % 8) as u8;
            if byte >= array.len() {
                array.resize(byte + 1, 0);
            }
            if (array[byte] >> bit) & 1 == 0 {
                array[byte] |= 1 << bit;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn test_bits(&self, name: &str, offsets: &[u64]) -> Result<bool, CacheError> {
        let arrays = self.arrays.lock();
        let Some(array) = arrays.get(name) else {
            return Ok(false);
        };
        Ok(offsets.iter().all(|&offset| {
            let byte = (offset / 8) as usize;
            let bit = (offset % 8) as u8;
            byte < array.len() && (array[byte] >> bit) & 1 == 1
        }))
    }

    async fn swap(&self, src: &str, dst: &str) -> Result<(), CacheError> {
        let mut arrays = self.arrays.lock();
        let Some(array) = arrays.remove(src) else {
            return Err(CacheError::filter_store(format!(
                "no such bit array: {src}"
            )));
        };
        arrays.insert(dst.to_string(), array);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), CacheError> {
        self.arrays.lock().remove(name);
        Ok(())
    }
}
