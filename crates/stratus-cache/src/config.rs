//! Cache configuration types.
//!
//! These are construction-time inputs supplied by the embedding
//! application's configuration layer; nothing here loads files or
//! environment variables. All durations are carried as millisecond fields
//! so the structs deserialize cleanly from TOML/JSON config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one logical cache.
///
/// The name is the cache's unique namespace: it prefixes every key on the
/// remote tier and addresses the cache in broadcast messages, so it must
/// match across all instances of a fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Logical cache name (unique per context).
    pub name: String,

    /// Local tier settings. `None` disables the local tier.
    #[serde(default)]
    pub local: Option<LocalTierSettings>,

    /// Remote tier settings. `None` disables the remote tier.
    #[serde(default)]
    pub remote: Option<RemoteTierSettings>,

    /// Whether mutations are broadcast to other instances.
    #[serde(default)]
    pub sync_enabled: bool,

    /// Refresh-ahead policy. `None` disables background refresh.
    #[serde(default)]
    pub refresh: Option<RefreshPolicy>,
}

impl CacheConfig {
    /// Create a config with both tiers disabled; enable what you need via
    /// the `with_*` methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: None,
            remote: None,
            sync_enabled: false,
            refresh: None,
        }
    }

    /// Enable the local tier.
    pub fn with_local(mut self, settings: LocalTierSettings) -> Self {
        self.local = Some(settings);
        self
    }

    /// Enable the remote tier.
    pub fn with_remote(mut self, settings: RemoteTierSettings) -> Self {
        self.remote = Some(settings);
        self
    }

    /// Enable cross-instance sync.
    pub fn with_sync(mut self) -> Self {
        self.sync_enabled = true;
        self
    }

    /// Enable refresh-ahead.
    pub fn with_refresh(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = Some(policy);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("cache name must not be empty".into());
        }
        if self.local.is_none() && self.remote.is_none() {
            return Err(format!("cache {} must enable at least one tier", self.name));
        }
        if let Some(local) = &self.local {
            local.validate()?;
        }
        if let Some(refresh) = &self.refresh {
            refresh.validate()?;
        }
        Ok(())
    }
}

/// Local tier sizing hints, passed to the tier implementation verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTierSettings {
    /// Maximum number of entries.
    #[serde(default = "default_local_capacity")]
    pub capacity: usize,

    /// Entry TTL in milliseconds; 0 means entries never expire.
    #[serde(default = "default_local_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_local_capacity() -> usize {
    10_000
}

fn default_local_ttl_ms() -> u64 {
    3_600_000
}

impl Default for LocalTierSettings {
    fn default() -> Self {
        Self {
            capacity: default_local_capacity(),
            ttl_ms: default_local_ttl_ms(),
        }
    }
}

impl LocalTierSettings {
    /// Entry TTL, or `None` when entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("local tier capacity must be > 0".into());
        }
        Ok(())
    }
}

/// Remote tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTierSettings {
    /// Entry TTL in milliseconds; 0 means entries never expire.
    #[serde(default = "default_remote_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_remote_ttl_ms() -> u64 {
    3_600_000
}

impl Default for RemoteTierSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_remote_ttl_ms(),
        }
    }
}

impl RemoteTierSettings {
    /// Entry TTL; zero means no expiry.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Refresh-ahead policy for hot keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPolicy {
    /// Fixed delay between refresh firings for a key, in milliseconds.
    pub refresh_interval_ms: u64,

    /// Cancel a key's refresh task once it has gone unread for this long,
    /// in milliseconds; 0 keeps tasks alive until the cache closes.
    #[serde(default)]
    pub stale_after_access_ms: u64,

    /// Lease on the cross-instance refresh lock, in milliseconds.
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_timeout_ms: u64,
}

fn default_lock_lease_ms() -> u64 {
    60_000
}

impl RefreshPolicy {
    /// Policy refreshing every `interval`, with the default lock lease and
    /// no staleness bound.
    pub fn new(interval: Duration) -> Self {
        Self {
            refresh_interval_ms: interval.as_millis() as u64,
            stale_after_access_ms: 0,
            lock_lease_timeout_ms: default_lock_lease_ms(),
        }
    }

    /// Cancel tasks for keys unread longer than `idle`.
    pub fn with_stale_after_access(mut self, idle: Duration) -> Self {
        self.stale_after_access_ms = idle.as_millis() as u64;
        self
    }

    /// Override the refresh-lock lease.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease_timeout_ms = lease.as_millis() as u64;
        self
    }

    /// Delay between refresh firings.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Idle bound after which a task self-cancels; zero means never.
    pub fn stale_after_access(&self) -> Duration {
        Duration::from_millis(self.stale_after_access_ms)
    }

    /// Refresh-lock lease.
    pub fn lock_lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_lease_timeout_ms)
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval_ms == 0 {
            return Err("refresh_interval_ms must be > 0".into());
        }
        if self.lock_lease_timeout_ms == 0 {
            return Err("lock_lease_timeout_ms must be > 0".into());
        }
        Ok(())
    }
}

/// Sizing for a probabilistic membership filter namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Expected number of distinct elements.
    #[serde(default = "default_expected_insertions")]
    pub expected_insertions: u64,

    /// Target false-positive probability, exclusive between 0 and 1.
    #[serde(default = "default_false_positive_probability")]
    pub false_positive_probability: f64,
}

fn default_expected_insertions() -> u64 {
    1_000_000
}

fn default_false_positive_probability() -> f64 {
    0.01
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_insertions: default_expected_insertions(),
            false_positive_probability: default_false_positive_probability(),
        }
    }
}

impl FilterConfig {
    /// Validate the sizing parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.expected_insertions == 0 {
            return Err("expected_insertions must be > 0".into());
        }
        if !(self.false_positive_probability > 0.0 && self.false_positive_probability < 1.0) {
            return Err("false_positive_probability must be in (0, 1)".into());
        }
        Ok(())
    }
}
