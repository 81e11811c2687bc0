//! Distributed lock contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Named mutual-exclusion primitive with wait/lease semantics.
///
/// A failed acquisition is a normal "someone else holds it" signal, not an
/// error; callers that cannot tolerate queueing pass a zero wait time and
/// back off entirely on `false`.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire `name`, waiting at most `wait` and holding the lock
    /// for at most `lease` before it expires on its own.
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere and the wait
    /// time elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Lock`] only for collaborator failures, never
    /// for contention.
    async fn try_lock(&self, name: &str, wait: Duration, lease: Duration)
    -> Result<bool, CacheError>;

    /// Release a lock previously acquired through this handle.
    ///
    /// Releasing a lock whose lease already expired (and which may now be
    /// held by another instance) must not disturb the new holder.
    async fn unlock(&self, name: &str) -> Result<(), CacheError>;
}
