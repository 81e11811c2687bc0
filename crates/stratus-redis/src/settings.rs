//! Redis connection settings and pool construction.

use std::time::Duration;

use deadpool_redis::Pool;
use serde::{Deserialize, Serialize};

use stratus_core::CacheError;

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    16
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Create a connection pool from settings and verify connectivity.
///
/// # Errors
///
/// Returns [`CacheError::Remote`] if the pool cannot be created or an
/// initial connection cannot be established.
pub async fn create_pool(settings: &RedisSettings) -> Result<Pool, CacheError> {
    tracing::info!(url = %settings.url, "Connecting to Redis");

    let mut config = deadpool_redis::Config::from_url(&settings.url);
    if let Some(ref mut pool_config) = config.pool {
        pool_config.max_size = settings.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(settings.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(settings.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(settings.timeout_ms));
    }

    let pool = config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::remote(format!("failed to create Redis pool: {e}")))?;

    pool.get()
        .await
        .map_err(|e| CacheError::remote(format!("failed to connect to Redis: {e}")))?;

    tracing::info!("Connected to Redis");
    Ok(pool)
}
