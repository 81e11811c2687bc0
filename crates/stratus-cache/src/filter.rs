//! Probabilistic membership filter with hot rebuild.
//!
//! Guards the expensive lookup path against keys known never to have
//! existed: `might_contain` returning `false` means the element is
//! definitely absent and the backing lookup can be skipped entirely;
//! `true` means it may be present and the normal lookup proceeds.
//!
//! The bit array lives in a [`FilterStore`] — in-memory for a
//! single-instance deployment, a shared store (Redis bitmap) for a fleet —
//! so the same coordinator serves both shapes. Rebuilds populate a
//! staging array under a temporary name and swap it over the live name in
//! one atomic rename; readers never observe a partially populated filter.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

use stratus_core::{CacheError, FilterStore};

use crate::config::FilterConfig;
use crate::metrics;

const HASH_SEED: u64 = 0x9e3779b97f4a7c15;

/// Offsets are flushed to the store in batches of this many bits during
/// bulk operations.
const SET_BATCH_BITS: usize = 4096;

/// Bloom filter over a named bit array.
#[derive(Clone)]
pub struct BloomFilter {
    name: String,
    store: Arc<dyn FilterStore>,
    bits: u64,
    hashes: u32,
}

impl BloomFilter {
    /// Create a filter coordinator for `name`, sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] for invalid sizing
    /// parameters.
    pub fn new(
        name: impl Into<String>,
        config: &FilterConfig,
        store: Arc<dyn FilterStore>,
    ) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::configuration)?;

        let n = config.expected_insertions as f64;
        let p = config.false_positive_probability;
        let bits = ((-n * p.ln()) / 2.0_f64.ln().powi(2)).ceil().max(64.0) as u64;
        let hashes = ((bits as f64 / n) * 2.0_f64.ln()).round().max(1.0) as u32;

        Ok(Self {
            name: name.into(),
            store,
            bits,
            hashes,
        })
    }

    /// Size of the bit array.
    pub fn bit_count(&self) -> u64 {
        self.bits
    }

    /// Number of hash functions applied per element.
    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    /// Double hashing: two xxh3 passes combined per probe, instead of one
    /// hash per probe.
    fn offsets(&self, element: &[u8]) -> Vec<u64> {
        let h1 = xxh3_64(element);
        let h2 = xxh3_64_with_seed(element, HASH_SEED);
        (0..self.hashes as u64)
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bits)
            .collect()
    }

    /// Whether `element` may be in the set. `false` means definitely
    /// absent. Empty input returns `false` without consulting the store.
    pub async fn might_contain(&self, element: impl AsRef<[u8]>) -> Result<bool, CacheError> {
        let element = element.as_ref();
        if element.is_empty() {
            return Ok(false);
        }
        self.store
            .test_bits(&self.name, &self.offsets(element))
            .await
    }

    /// Insert an element. Returns whether the insertion changed filter
    /// state — informational only. Empty input is a no-op.
    pub async fn add(&self, element: impl AsRef<[u8]>) -> Result<bool, CacheError> {
        let element = element.as_ref();
        if element.is_empty() {
            return Ok(false);
        }
        let flipped = self
            .store
            .set_bits(&self.name, &self.offsets(element))
            .await?;
        Ok(flipped > 0)
    }

    /// Insert several elements. Returns how many of them changed filter
    /// state.
    pub async fn add_all<E: AsRef<[u8]> + Sync>(&self, elements: &[E]) -> Result<u64, CacheError> {
        let mut changed = 0;
        for element in elements {
            if self.add(element).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Replace the filter's membership with exactly `dataset`.
    ///
    /// Builds a fresh array under a temporary name, populates it, then
    /// atomically renames it over the live name. Elements previously added
    /// but absent from `dataset` are no longer represented afterwards.
    ///
    /// # Errors
    ///
    /// If populating or the rename fails, the previous filter remains
    /// authoritative; the staging array is dropped on a best-effort basis
    /// and the error is returned.
    pub async fn rebuild<E: AsRef<[u8]> + Sync>(&self, dataset: &[E]) -> Result<(), CacheError> {
        let staging = format!("{}:rebuild:{}", self.name, Uuid::new_v4().simple());

        if let Err(e) = self.populate(&staging, dataset).await {
            warn!(filter = %self.name, error = %e, "filter rebuild failed while populating; previous filter remains live");
            let _ = self.store.remove(&staging).await;
            return Err(e);
        }

        if let Err(e) = self.store.swap(&staging, &self.name).await {
            warn!(filter = %self.name, error = %e, "filter rebuild swap failed; previous filter remains live");
            let _ = self.store.remove(&staging).await;
            return Err(e);
        }

        info!(filter = %self.name, elements = dataset.len(), "filter rebuilt");
        metrics::record_filter_rebuild();
        Ok(())
    }

    async fn populate<E: AsRef<[u8]> + Sync>(
        &self,
        staging: &str,
        dataset: &[E],
    ) -> Result<(), CacheError> {
        self.store.ensure(staging, self.bits).await?;
        let mut batch = Vec::with_capacity(SET_BATCH_BITS);
        for element in dataset {
            let element = element.as_ref();
            if element.is_empty() {
                continue;
            }
            batch.extend(self.offsets(element));
            if batch.len() >= SET_BATCH_BITS {
                self.store.set_bits(staging, &batch).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.store.set_bits(staging, &batch).await?;
        }
        Ok(())
    }
}
