//! Tier contracts: the in-process local tier and the shared remote tier.
//!
//! The local tier stores application values directly — nothing is
//! serialized inside the process. The remote tier is byte-oriented: values
//! cross its boundary through a [`ValueCodec`](crate::codec::ValueCodec).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// In-process cache tier holding decoded values.
///
/// Implementations own their TTL and capacity policy; the coordination
/// engine passes both as construction-time hints and never inspects them
/// afterwards. All methods are synchronous — a local tier lookup must not
/// await.
///
/// Implementations must be safe for concurrent `get`/`put`/`invalidate`
/// from caller tasks and broadcast listener tasks.
pub trait LocalTier<V>: Send + Sync {
    /// Look up a value. Expired entries are treated as absent.
    fn get(&self, key: &str) -> Option<V>;

    /// Batch lookup. Keys without a live entry are absent from the result.
    fn get_many(&self, keys: &[String]) -> HashMap<String, V>;

    /// Insert or replace a value.
    fn put(&self, key: String, value: V);

    /// Batch insert.
    fn put_many(&self, entries: Vec<(String, V)>);

    /// Remove a single entry. Missing keys are a no-op.
    fn invalidate(&self, key: &str);

    /// Remove several entries.
    fn invalidate_many(&self, keys: &[String]);

    /// Number of live entries (may include not-yet-collected expired ones).
    fn len(&self) -> usize;

    /// Whether the tier holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared out-of-process cache tier.
///
/// This is the fleet's source of cross-instance truth: every local-tier
/// miss falls through here before the loader runs. Values are opaque
/// bytes; TTLs are applied per write.
///
/// # Errors
///
/// All methods surface transport failures as [`CacheError::Remote`]. The
/// engine propagates these on caller-facing paths and degrades gracefully
/// on background paths.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Read a value. Returns `None` if the key does not exist or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Batch read. Missing keys are absent from the result map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    /// Write a value with a TTL. A zero TTL means "no expiry".
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Batch write with a shared TTL.
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration)
    -> Result<(), CacheError>;

    /// Delete a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete several keys.
    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError>;
}
