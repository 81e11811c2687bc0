//! Cross-instance cache coherence over a pub/sub channel.
//!
//! Every mutation on a sync-enabled cache publishes a [`BroadcastMessage`]
//! to one shared channel. Peer instances apply received messages to their
//! local tier only — the originating instance already performed the remote
//! write, so re-applying it remotely would be redundant at best.
//!
//! ## Echo suppression
//!
//! Each broadcaster carries a process-unique instance id, stamped on every
//! outgoing message. A received message carrying our own id is an echo of
//! our own mutation and is discarded: applying it would needlessly evict
//! or overwrite a fresh local write, and re-publishing on receipt would
//! create a feedback loop.
//!
//! ## Delivery semantics
//!
//! Publishing is best-effort: transport failures are logged and the
//! message is dropped — no retry, no buffering. Every read still falls
//! through to the remote tier as ground truth, so a missed message only
//! extends local staleness until TTL expiry or the next refresh cycle.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use stratus_core::{MessageHandler, PubSubChannel, SubscriptionId};

use crate::metrics;

/// A cache mutation event carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Instance that performed the mutation; used only for echo
    /// suppression.
    pub origin: Uuid,
    /// Name of the mutated cache.
    pub cache: String,
    /// What changed.
    pub kind: MessageKind,
}

/// Broadcast payload kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageKind {
    /// Keys were written; peers put the encoded values into their local
    /// tier.
    Update {
        /// Full cache keys with codec-encoded values.
        entries: Vec<(String, Vec<u8>)>,
    },
    /// Keys were removed; peers drop them from their local tier.
    Invalidate {
        /// Full cache keys.
        keys: Vec<String>,
    },
}

impl MessageKind {
    fn label(&self) -> &'static str {
        match self {
            MessageKind::Update { .. } => "update",
            MessageKind::Invalidate { .. } => "invalidate",
        }
    }
}

/// A cache that can have remote mutations applied to its local tier.
///
/// Implemented by the coordinator for every key/value instantiation, so
/// the broadcaster can dispatch by cache name without knowing the types.
pub(crate) trait SyncTarget: Send + Sync {
    fn sync_enabled(&self) -> bool;
    fn apply_update(&self, entries: &[(String, Vec<u8>)]);
    fn apply_invalidate(&self, keys: &[String]);
}

/// Publishes and consumes cache coherence events for one process.
///
/// One broadcaster is shared by every sync-enabled cache in a
/// [`CacheContext`](crate::context::CacheContext). The channel
/// subscription is lazy — established when the first cache registers — and
/// idempotent under concurrent first use.
pub struct Broadcaster {
    instance_id: Uuid,
    channel: String,
    bus: Arc<dyn PubSubChannel>,
    targets: DashMap<String, Arc<dyn SyncTarget>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Broadcaster {
    /// Create a broadcaster over `bus`, publishing on `channel`.
    pub(crate) fn new(bus: Arc<dyn PubSubChannel>, channel: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            instance_id: Uuid::new_v4(),
            channel: channel.into(),
            bus,
            targets: DashMap::new(),
            subscription: Mutex::new(None),
        })
    }

    /// This process's broadcast identity.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Register a cache as a sync target and make sure the channel
    /// subscription exists.
    pub(crate) async fn register(self: &Arc<Self>, name: &str, target: Arc<dyn SyncTarget>) {
        self.targets.insert(name.to_string(), target);
        self.ensure_subscribed().await;
    }

    /// Drop a cache's registration; detaches from the channel once the
    /// last cache is gone.
    pub(crate) async fn unregister(&self, name: &str) {
        if self.targets.remove(name).is_some() && self.targets.is_empty() {
            self.close().await;
        }
    }

    /// Detach the channel subscription. Idempotent.
    pub async fn close(&self) {
        let mut subscription = self.subscription.lock().await;
        if let Some(id) = subscription.take() {
            if let Err(e) = self.bus.unsubscribe(&self.channel, id).await {
                warn!(channel = %self.channel, error = %e, "failed to unsubscribe from broadcast channel");
            } else {
                info!(channel = %self.channel, "broadcast subscription closed");
            }
        }
    }

    /// Publish a mutation event. Best-effort: failures are logged and the
    /// event is dropped.
    pub(crate) async fn publish(&self, cache: &str, kind: MessageKind) {
        let label = kind.label();
        let message = BroadcastMessage {
            origin: self.instance_id,
            cache: cache.to_string(),
            kind,
        };
        let payload = match rmp_serde::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(cache = %cache, error = %e, "failed to serialize broadcast message");
                return;
            }
        };
        match self.bus.publish(&self.channel, payload).await {
            Ok(()) => {
                trace!(cache = %cache, kind = label, "published broadcast");
                metrics::record_broadcast_published(label);
            }
            Err(e) => {
                warn!(cache = %cache, error = %e, "failed to publish broadcast; peers converge via remote tier");
            }
        }
    }

    /// Establish the channel subscription if it does not exist yet.
    ///
    /// Guarded by a mutex so concurrent first use across several caches
    /// results in exactly one subscribe call. A failed attempt is retried
    /// the next time a cache registers.
    async fn ensure_subscribed(self: &Arc<Self>) {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return;
        }
        let handler = Arc::new(BusListener {
            broadcaster: Arc::downgrade(self),
        });
        match self.bus.subscribe(&self.channel, handler).await {
            Ok(id) => {
                info!(channel = %self.channel, instance = %self.instance_id, "subscribed to broadcast channel");
                *subscription = Some(id);
            }
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "failed to subscribe to broadcast channel; sync degraded");
            }
        }
    }

    /// Apply a received payload.
    fn apply(&self, payload: &[u8]) {
        let message: BroadcastMessage = match rmp_serde::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to deserialize broadcast message");
                return;
            }
        };

        if message.origin == self.instance_id {
            trace!(cache = %message.cache, "ignoring echo of our own broadcast");
            metrics::record_broadcast_suppressed();
            return;
        }

        let Some(target) = self.targets.get(&message.cache) else {
            debug!(cache = %message.cache, "broadcast for unknown cache; ignoring");
            return;
        };
        if !target.sync_enabled() {
            return;
        }

        let label = message.kind.label();
        match &message.kind {
            MessageKind::Update { entries } => target.apply_update(entries),
            MessageKind::Invalidate { keys } => target.apply_invalidate(keys),
        }
        debug!(cache = %message.cache, kind = label, origin = %message.origin, "applied broadcast");
        metrics::record_broadcast_applied(label);
    }
}

/// Channel handler forwarding payloads to the broadcaster.
///
/// Holds a `Weak` reference so an abandoned broadcaster can be dropped
/// even while the channel implementation retains its handler.
struct BusListener {
    broadcaster: Weak<Broadcaster>,
}

#[async_trait]
impl MessageHandler for BusListener {
    async fn handle(&self, payload: &[u8]) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.apply(payload);
        }
    }
}
