//! Bit-array store contract backing probabilistic membership filters.
//!
//! A store holds named bit arrays. The rebuild protocol relies on `swap`
//! being a single atomic rename: readers of `dst` observe either the old
//! array or the fully populated replacement, never a partially written one.

use async_trait::async_trait;

use crate::error::CacheError;

/// Named bit-array storage.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// Materialize a zero-filled bit array of `nbits` bits if `name` does
    /// not exist yet. Existing arrays are left untouched.
    async fn ensure(&self, name: &str, nbits: u64) -> Result<(), CacheError>;

    /// Set the given bit offsets. Returns how many flipped from 0 to 1.
    async fn set_bits(&self, name: &str, offsets: &[u64]) -> Result<u64, CacheError>;

    /// Whether every given offset is set. A missing array reads as all
    /// zeroes.
    async fn test_bits(&self, name: &str, offsets: &[u64]) -> Result<bool, CacheError>;

    /// Atomically replace `dst` with `src`; `src` ceases to exist.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::FilterStore`] if `src` does not exist or the
    /// rename fails. On failure `dst` must be left as it was.
    async fn swap(&self, src: &str, dst: &str) -> Result<(), CacheError>;

    /// Drop a bit array entirely. Missing names are not an error.
    async fn remove(&self, name: &str) -> Result<(), CacheError>;
}
