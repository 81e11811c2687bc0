//! The cache context: shared collaborators plus the by-name registry.
//!
//! Created once at process startup and passed to whoever builds caches —
//! dependency injection by parameter, not ambient global state, so tests
//! can construct isolated contexts per case.
//!
//! The registry gives idempotent construction: building a cache under a
//! name that already exists returns the existing instance (the new
//! builder's collaborators are ignored), and concurrent first builds
//! under one name produce exactly one cache.

use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use stratus_core::{CacheError, DistributedLock, FilterStore, PubSubChannel, RemoteTier};

use crate::broadcast::Broadcaster;
use crate::builder::CacheBuilder;
use crate::config::{CacheConfig, FilterConfig};
use crate::coordinator::CacheInner;
use crate::filter::BloomFilter;

/// Default pub/sub channel for coherence events.
pub const DEFAULT_BROADCAST_CHANNEL: &str = "stratus:broadcast";

/// Type-erased handle for lifecycle operations on a registered cache.
#[async_trait]
pub(crate) trait ManagedCache: Send + Sync {
    async fn close_cache(&self);
}

#[async_trait]
impl<K, V> ManagedCache for CacheInner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn close_cache(&self) {
        self.close().await;
    }
}

struct RegisteredCache {
    /// The concrete `CacheInner<K, V>`, for typed downcast lookups.
    any: Arc<dyn Any + Send + Sync>,
    /// The same instance behind its lifecycle interface.
    managed: Arc<dyn ManagedCache>,
}

/// Composition root for a process's caches.
///
/// Holds the collaborators shared by every cache — remote tier, pub/sub
/// channel (wrapped in a [`Broadcaster`]), distributed lock, filter store
/// — and the registry of caches by name.
pub struct CacheContext {
    pub(crate) remote: Option<Arc<dyn RemoteTier>>,
    pub(crate) lock: Option<Arc<dyn DistributedLock>>,
    pub(crate) filter_store: Option<Arc<dyn FilterStore>>,
    pub(crate) broadcaster: Option<Arc<Broadcaster>>,
    caches: DashMap<String, RegisteredCache>,
}

impl CacheContext {
    /// Start building a context.
    pub fn builder() -> CacheContextBuilder {
        CacheContextBuilder::default()
    }

    /// The broadcast identity of this context, if sync is wired.
    pub fn instance_id(&self) -> Option<Uuid> {
        self.broadcaster.as_ref().map(|b| b.instance_id())
    }

    /// Start building (or looking up) the cache named in `config`.
    pub fn cache<K, V>(self: &Arc<Self>, config: CacheConfig) -> CacheBuilder<K, V>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        CacheBuilder::new(Arc::clone(self), config)
    }

    /// Create a membership filter for `name`, backed by the context's
    /// filter store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] when the context has no
    /// filter store or the sizing is invalid.
    pub fn filter(
        &self,
        name: impl Into<String>,
        config: &FilterConfig,
    ) -> Result<BloomFilter, CacheError> {
        let store = self.filter_store.clone().ok_or_else(|| {
            CacheError::configuration("context has no filter store collaborator")
        })?;
        BloomFilter::new(name, config, store)
    }

    /// Register a freshly built cache, or return the instance already
    /// holding the name. Compute-if-absent under the registry's locking,
    /// so concurrent first builds create exactly one cache.
    pub(crate) fn register<K, V>(
        &self,
        inner: Arc<CacheInner<K, V>>,
    ) -> Result<Arc<CacheInner<K, V>>, CacheError>
    where
        K: Clone + Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let name = inner.config.name.clone();
        match self.caches.entry(name) {
            Entry::Occupied(slot) => Arc::clone(&slot.get().any)
                .downcast::<CacheInner<K, V>>()
                .map_err(|_| CacheError::type_mismatch(&inner.config.name)),
            Entry::Vacant(slot) => {
                slot.insert(RegisteredCache {
                    any: inner.clone(),
                    managed: inner.clone(),
                });
                Ok(inner)
            }
        }
    }

    /// Number of registered caches.
    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    /// Close every registered cache and the broadcaster.
    pub async fn close(&self) {
        let managed: Vec<Arc<dyn ManagedCache>> = self
            .caches
            .iter()
            .map(|entry| Arc::clone(&entry.value().managed))
            .collect();
        for cache in managed {
            cache.close_cache().await;
        }
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.close().await;
        }
    }
}

/// Builder for [`CacheContext`].
#[derive(Default)]
pub struct CacheContextBuilder {
    remote: Option<Arc<dyn RemoteTier>>,
    bus: Option<Arc<dyn PubSubChannel>>,
    channel: Option<String>,
    lock: Option<Arc<dyn DistributedLock>>,
    filter_store: Option<Arc<dyn FilterStore>>,
}

impl CacheContextBuilder {
    /// Wire the shared remote tier.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Wire the pub/sub channel used for cross-instance sync.
    pub fn with_bus(mut self, bus: Arc<dyn PubSubChannel>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the broadcast channel name (defaults to
    /// [`DEFAULT_BROADCAST_CHANNEL`]). Must match across the fleet.
    pub fn with_broadcast_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Wire the distributed lock used by refresh-ahead.
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Wire the filter store backing membership filters.
    pub fn with_filter_store(mut self, store: Arc<dyn FilterStore>) -> Self {
        self.filter_store = Some(store);
        self
    }

    /// Assemble the context.
    pub fn build(self) -> Arc<CacheContext> {
        let broadcaster = self.bus.map(|bus| {
            Broadcaster::new(
                bus,
                self.channel
                    .unwrap_or_else(|| DEFAULT_BROADCAST_CHANNEL.to_string()),
            )
        });
        Arc::new(CacheContext {
            remote: self.remote,
            lock: self.lock,
            filter_store: self.filter_store,
            broadcaster,
            caches: DashMap::new(),
        })
    }
}
