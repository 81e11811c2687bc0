//! Error types for cache coordination.
//!
//! Collaborator failures are wrapped at the boundary where they occur; the
//! engine decides per call site whether a failure propagates to the caller
//! (remote tier on the get/put paths) or degrades a background feature
//! (broadcast, refresh).

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The remote tier could not be reached or returned an error.
    #[error("Remote tier error: {message}")]
    Remote {
        /// Description of the transport or store failure.
        message: String,
    },

    /// The pub/sub channel could not be reached or returned an error.
    #[error("Pub/sub error: {message}")]
    PubSub {
        /// Description of the channel failure.
        message: String,
    },

    /// The distributed lock collaborator failed.
    #[error("Lock error: {message}")]
    Lock {
        /// Description of the lock failure.
        message: String,
    },

    /// A value could not be encoded for, or decoded from, the remote tier.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the serialization failure.
        message: String,
    },

    /// The filter store collaborator failed.
    #[error("Filter store error: {message}")]
    FilterStore {
        /// Description of the store failure.
        message: String,
    },

    /// Invalid construction-time configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The cache has been closed and no longer accepts operations.
    #[error("Cache closed: {cache}")]
    Closed {
        /// Name of the closed cache.
        cache: String,
    },

    /// A cache name is already registered with different key/value types.
    #[error("Cache {cache} already exists with different key/value types")]
    TypeMismatch {
        /// Name of the conflicting cache.
        cache: String,
    },
}

impl CacheError {
    /// Creates a new `Remote` error.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a new `PubSub` error.
    #[must_use]
    pub fn pubsub(message: impl Into<String>) -> Self {
        Self::PubSub {
            message: message.into(),
        }
    }

    /// Creates a new `Lock` error.
    #[must_use]
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// Creates a new `Codec` error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a new `FilterStore` error.
    #[must_use]
    pub fn filter_store(message: impl Into<String>) -> Self {
        Self::FilterStore {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a new `Closed` error.
    #[must_use]
    pub fn closed(cache: impl Into<String>) -> Self {
        Self::Closed {
            cache: cache.into(),
        }
    }

    /// Creates a new `TypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(cache: impl Into<String>) -> Self {
        Self::TypeMismatch {
            cache: cache.into(),
        }
    }

    /// Check if this error came from an unreachable or failing collaborator
    /// (retryable on a later cycle).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::PubSub { .. } | Self::Lock { .. } | Self::FilterStore { .. }
        )
    }

    /// Check if this error is a construction/usage error on the caller's side.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Closed { .. } | Self::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(CacheError::remote("connection refused").is_transient());
        assert!(CacheError::lock("timeout").is_transient());
        assert!(!CacheError::configuration("bad ttl").is_transient());
    }

    #[test]
    fn classifies_usage_errors() {
        assert!(CacheError::closed("orders").is_usage_error());
        assert!(CacheError::type_mismatch("orders").is_usage_error());
        assert!(!CacheError::pubsub("gone").is_usage_error());
    }
}
