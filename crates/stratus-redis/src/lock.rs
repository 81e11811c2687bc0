//! Distributed lock over Redis.
//!
//! Acquisition is a single `SET name token NX PX lease` — atomic
//! create-with-expiry. Release runs a small Lua script that deletes the
//! key only when it still holds this manager's token, so a lease that
//! expired mid-critical-section never releases the next holder's lock.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use uuid::Uuid;

use stratus_core::{CacheError, DistributedLock};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// [`DistributedLock`] backed by Redis string keys.
///
/// One manager per process instance; it remembers the token of every lock
/// it currently holds.
pub struct RedisLockManager {
    pool: Pool,
    held: DashMap<String, String>,
}

impl RedisLockManager {
    /// Create a lock manager over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            held: DashMap::new(),
        }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::lock(format!("failed to get Redis connection: {e}")))
    }

    async fn try_acquire(&self, name: &str, token: &str, lease: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::lock(format!("Redis SET NX error: {e}")))?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLockManager {
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<bool, CacheError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        loop {
            if self.try_acquire(name, &token, lease).await? {
                self.held.insert(name.to_string(), token);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&self, name: &str) -> Result<(), CacheError> {
        let Some((_, token)) = self.held.remove(name) else {
            return Ok(());
        };
        let mut conn = self.conn().await?;
        redis::Script::new(UNLOCK_SCRIPT)
            .key(name)
            .arg(token)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| CacheError::lock(format!("Redis unlock script error: {e}")))?;
        Ok(())
    }
}
