//! Capability assembly for a single cache.
//!
//! The builder fixes each capability — local tier, remote tier, loader,
//! sync, refresh — as present or absent at construction time. There are no
//! runtime-discoverable wrapper chains: what the builder assembles is what
//! the cache is.

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use stratus_core::{
    CacheError, DisplayKeyEncoder, JsonCodec, KeyEncoder, Loader, LocalTier, MemoryTier,
    MsgPackCodec, ValueCodec, loader_fn,
};

use crate::broadcast::SyncTarget;
use crate::config::CacheConfig;
use crate::context::CacheContext;
use crate::coordinator::{CacheInner, StatCounters, TieredCache};
use crate::refresh::RefreshScheduler;

/// Builder for a [`TieredCache`].
///
/// Obtained from [`CacheContext::cache`]. If a cache with the configured
/// name already exists in the context, [`build`](Self::build) returns that
/// instance and ignores the builder's collaborators.
pub struct CacheBuilder<K, V> {
    context: Arc<CacheContext>,
    config: CacheConfig,
    key_encoder: Option<Arc<dyn KeyEncoder<K>>>,
    codec: Option<Arc<dyn ValueCodec<V>>>,
    local: Option<Arc<dyn LocalTier<V>>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(context: Arc<CacheContext>, config: CacheConfig) -> Self {
        Self {
            context,
            config,
            key_encoder: None,
            codec: None,
            local: None,
            loader: None,
        }
    }

    /// Use a custom key encoder.
    pub fn key_encoder(mut self, encoder: Arc<dyn KeyEncoder<K>>) -> Self {
        self.key_encoder = Some(encoder);
        self
    }

    /// Encode keys through their `Display` impl.
    pub fn display_keys(self) -> Self
    where
        K: Display,
    {
        self.key_encoder(Arc::new(DisplayKeyEncoder))
    }

    /// Use a custom value codec.
    pub fn value_codec(mut self, codec: Arc<dyn ValueCodec<V>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Encode values as MessagePack on the remote tier and the wire.
    pub fn msgpack_values(self) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        self.value_codec(Arc::new(MsgPackCodec))
    }

    /// Encode values as JSON on the remote tier and the wire.
    pub fn json_values(self) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        self.value_codec(Arc::new(JsonCodec))
    }

    /// Use a custom local tier implementation instead of the built-in
    /// memory tier.
    pub fn local_tier(mut self, tier: Arc<dyn LocalTier<V>>) -> Self {
        self.local = Some(tier);
        self
    }

    /// Attach a loader invoked on double misses and refresh cycles.
    pub fn loader(mut self, loader: Arc<dyn Loader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Attach an async closure as the loader.
    pub fn load_with<F, Fut>(self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
        V: Send,
    {
        self.loader(Arc::new(loader_fn(f)))
    }

    /// Assemble the cache, or return the existing instance under this
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] when the config is invalid or
    /// requires a collaborator the context does not have, and
    /// [`CacheError::TypeMismatch`] when the name is taken by a cache with
    /// different key/value types.
    pub async fn build(self) -> Result<TieredCache<K, V>, CacheError> {
        let config = self.config;
        config.validate().map_err(CacheError::configuration)?;

        let key_encoder = self.key_encoder.ok_or_else(|| {
            CacheError::configuration(format!(
                "cache {}: key encoder required (display_keys() or key_encoder())",
                config.name
            ))
        })?;

        let local: Option<Arc<dyn LocalTier<V>>> = match (self.local, &config.local) {
            (Some(tier), _) => Some(tier),
            (None, Some(settings)) => Some(Arc::new(MemoryTier::new(
                settings.capacity,
                settings.ttl(),
            ))),
            (None, None) => None,
        };

        let remote = if config.remote.is_some() {
            Some(self.context.remote.clone().ok_or_else(|| {
                CacheError::configuration(format!(
                    "cache {} enables the remote tier but the context has no remote collaborator",
                    config.name
                ))
            })?)
        } else {
            None
        };

        let broadcaster = if config.sync_enabled {
            Some(self.context.broadcaster.clone().ok_or_else(|| {
                CacheError::configuration(format!(
                    "cache {} enables sync but the context has no pub/sub channel",
                    config.name
                ))
            })?)
        } else {
            None
        };

        if (remote.is_some() || config.sync_enabled) && self.codec.is_none() {
            return Err(CacheError::configuration(format!(
                "cache {}: value codec required (msgpack_values() or json_values())",
                config.name
            )));
        }

        let refresh = config.refresh.clone().map(RefreshScheduler::new);

        let inner = Arc::new(CacheInner {
            config,
            key_encoder,
            codec: self.codec,
            local,
            remote,
            lock: self.context.lock.clone(),
            loader: self.loader,
            broadcaster,
            refresh,
            stats: StatCounters::default(),
            closed: AtomicBool::new(false),
        });

        let registered = self.context.register(inner.clone())?;
        if Arc::ptr_eq(&registered, &inner) {
            if registered.config.sync_enabled {
                if let Some(broadcaster) = &registered.broadcaster {
                    let target: Arc<dyn SyncTarget> = registered.clone();
                    broadcaster
                        .register(&registered.config.name, target)
                        .await;
                }
            }
            info!(cache = %registered.config.name, "cache created");
        }

        Ok(TieredCache { inner: registered })
    }
}
