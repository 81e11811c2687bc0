//! Cache metrics emitted through the `metrics` facade.
//!
//! Stratus records counters only; wiring an exporter (Prometheus or
//! otherwise) is the embedding application's concern.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "stratus_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "stratus_cache_misses_total";
    pub const CACHE_LOADS_TOTAL: &str = "stratus_cache_loads_total";

    pub const BROADCASTS_PUBLISHED_TOTAL: &str = "stratus_broadcasts_published_total";
    pub const BROADCASTS_APPLIED_TOTAL: &str = "stratus_broadcasts_applied_total";
    pub const BROADCASTS_SUPPRESSED_TOTAL: &str = "stratus_broadcasts_suppressed_total";

    pub const REFRESH_CYCLES_TOTAL: &str = "stratus_refresh_cycles_total";

    pub const FILTER_REBUILDS_TOTAL: &str = "stratus_filter_rebuilds_total";
}

/// Record a cache hit on the given tier ("local" or "remote").
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss (no tier produced a value).
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a loader invocation that produced a value.
pub fn record_cache_load() {
    counter!(names::CACHE_LOADS_TOTAL).increment(1);
}

/// Record a published broadcast ("update" or "invalidate").
pub fn record_broadcast_published(kind: &'static str) {
    counter!(names::BROADCASTS_PUBLISHED_TOTAL, "kind" => kind).increment(1);
}

/// Record a broadcast applied to the local tier.
pub fn record_broadcast_applied(kind: &'static str) {
    counter!(names::BROADCASTS_APPLIED_TOTAL, "kind" => kind).increment(1);
}

/// Record an echo-suppressed broadcast.
pub fn record_broadcast_suppressed() {
    counter!(names::BROADCASTS_SUPPRESSED_TOTAL).increment(1);
}

/// Record a refresh cycle outcome ("refreshed", "converged",
/// "lock_contended", "loader_failed", "skipped_error", "cancelled_stale").
pub fn record_refresh_cycle(outcome: &'static str) {
    counter!(names::REFRESH_CYCLES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a completed filter rebuild.
pub fn record_filter_rebuild() {
    counter!(names::FILTER_REBUILDS_TOTAL).increment(1);
}
