//! Remote tier over Redis.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use stratus_core::{CacheError, RemoteTier};

/// [`RemoteTier`] backed by a Redis connection pool.
///
/// TTLs are applied with millisecond precision (`SET ... PX`); a zero TTL
/// writes without expiry. Batch writes go through a single pipeline so one
/// round-trip covers the whole entry set.
pub struct RedisRemote {
    pool: Pool,
}

impl RedisRemote {
    /// Create a remote tier over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::remote(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl RemoteTier for RedisRemote {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| CacheError::remote(format!("Redis GET error: {e}")))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn().await?;
        // MGET preserves key order; missing keys come back as nil.
        let mut pipe = redis::pipe();
        pipe.cmd("MGET");
        for key in keys {
            pipe.arg(key);
        }
        let (values,): (Vec<Option<Vec<u8>>>,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::remote(format!("Redis MGET error: {e}")))?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::remote(format!("Redis SET error: {e}")))
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if !ttl.is_zero() {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            pipe.add_command(cmd).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::remote(format!("Redis pipelined SET error: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::remote(format!("Redis DEL error: {e}")))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| CacheError::remote(format!("Redis DEL error: {e}")))
    }
}
