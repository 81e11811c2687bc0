//! Bit-array store over Redis bitmaps.
//!
//! Bit operations are pipelined so a whole element (several offsets) costs
//! one round-trip. `swap` maps to `RENAME`, which Redis executes
//! atomically — readers observe either the old or the new bitmap.

use async_trait::async_trait;
use deadpool_redis::Pool;

use stratus_core::{CacheError, FilterStore};

/// [`FilterStore`] backed by Redis bitmaps.
pub struct RedisFilterStore {
    pool: Pool,
}

impl RedisFilterStore {
    /// Create a filter store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::filter_store(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl FilterStore for RedisFilterStore {
    async fn ensure(&self, name: &str, nbits: u64) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(name)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis EXISTS error: {e}")))?;
        if exists {
            return Ok(());
        }
        // Writing a zero at the last offset materializes the whole array.
        redis::cmd("SETBIT")
            .arg(name)
            .arg(nbits.saturating_sub(1))
            .arg(0)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis SETBIT error: {e}")))?;
        Ok(())
    }

    async fn set_bits(&self, name: &str, offsets: &[u64]) -> Result<u64, CacheError> {
        if offsets.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("SETBIT").arg(name).arg(offset).arg(1);
        }
        let previous: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis SETBIT error: {e}")))?;
        Ok(previous.iter().filter(|&&bit| bit == 0).count() as u64)
    }

    async fn test_bits(&self, name: &str, offsets: &[u64]) -> Result<bool, CacheError> {
        if offsets.is_empty() {
            return Ok(true);
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for &offset in offsets {
            pipe.cmd("GETBIT").arg(name).arg(offset);
        }
        let bits: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis GETBIT error: {e}")))?;
        Ok(bits.iter().all(|&bit| bit == 1))
    }

    async fn swap(&self, src: &str, dst: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("RENAME")
            .arg(src)
            .arg(dst)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis RENAME error: {e}")))
    }

    async fn remove(&self, name: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(name)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| CacheError::filter_store(format!("Redis DEL error: {e}")))?;
        Ok(())
    }
}
