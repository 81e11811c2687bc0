//! Redis pub/sub channel.
//!
//! Publishing goes through the shared pool. Subscribing opens a dedicated
//! `redis::Client` connection — pooled connections cannot issue SUBSCRIBE —
//! and runs it on a background task that reconnects with exponential
//! backoff if the connection drops. Messages published while the
//! subscriber is reconnecting are lost; the engine's consistency model
//! already tolerates missed broadcasts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use stratus_core::{CacheError, MessageHandler, PubSubChannel, SubscriptionId};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// [`PubSubChannel`] backed by Redis pub/sub.
pub struct RedisBus {
    pool: Pool,
    redis_url: String,
    subscriptions: DashMap<SubscriptionId, JoinHandle<()>>,
    next_id: AtomicU64,
}

impl RedisBus {
    /// Create a bus publishing through `pool` and subscribing via a
    /// dedicated client connection to `redis_url`.
    pub fn new(pool: Pool, redis_url: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl PubSubChannel for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::pubsub(format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CacheError::pubsub(format!("Redis PUBLISH error: {e}")))
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, CacheError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = self.redis_url.clone();
        let channel = channel.to_string();

        let handle = tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match run_subscription(&url, &channel, &handler).await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        error!(
                            channel = %channel,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Redis subscriber error, reconnecting"
                        );
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });

        self.subscriptions.insert(id, handle);
        Ok(id)
    }

    async fn unsubscribe(&self, _channel: &str, id: SubscriptionId) -> Result<(), CacheError> {
        if let Some((_, handle)) = self.subscriptions.remove(&id) {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

async fn run_subscription(
    url: &str,
    channel: &str,
    handler: &Arc<dyn MessageHandler>,
) -> Result<(), CacheError> {
    let client = redis::Client::open(url)
        .map_err(|e| CacheError::pubsub(format!("failed to create Redis client: {e}")))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| CacheError::pubsub(format!("failed to get pub/sub connection: {e}")))?;

    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| CacheError::pubsub(format!("failed to subscribe: {e}")))?;

    info!(channel = %channel, "Subscribed to Redis channel");

    let mut stream = pubsub.on_message();
    loop {
        match stream.next().await {
            Some(msg) => match msg.get_payload::<Vec<u8>>() {
                Ok(payload) => {
                    debug!(channel = %channel, bytes = payload.len(), "received broadcast");
                    handler.handle(&payload).await;
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "failed to read message payload");
                }
            },
            None => {
                return Err(CacheError::pubsub("pub/sub stream ended"));
            }
        }
    }
}
