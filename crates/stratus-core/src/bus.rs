//! Pub/sub channel contract for cross-instance synchronization.
//!
//! Delivery is best-effort and at-least-once; no ordering is guaranteed
//! across publishers. Handlers are invoked on the channel implementation's
//! own tasks, fully asynchronous relative to caller tasks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CacheError;

/// Opaque subscription identifier returned by [`PubSubChannel::subscribe`].
pub type SubscriptionId = u64;

/// Callback invoked for every message received on a subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a raw message payload.
    async fn handle(&self, payload: &[u8]);
}

/// Fan-out message bus.
///
/// # Errors
///
/// Methods surface transport failures as [`CacheError::PubSub`]. The
/// engine treats publish failures as a degraded feature, never as a failed
/// caller operation — invalidation is a liveness optimization, not a
/// correctness requirement.
#[async_trait]
pub trait PubSubChannel: Send + Sync {
    /// Publish a payload to every subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), CacheError>;

    /// Attach a handler to `channel`. The returned id is required to
    /// unsubscribe.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, CacheError>;

    /// Detach a previously registered handler. Unknown ids are a no-op.
    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), CacheError>;
}
