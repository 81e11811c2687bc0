//! Multi-tier cache coordination engine.
//!
//! Stratus unifies an in-process cache tier and a shared remote tier
//! behind one access contract, keeps per-instance local tiers consistent
//! across a fleet via pub/sub invalidation, and protects the system of
//! record from load spikes via refresh-ahead scheduling with
//! cross-instance mutual exclusion.
//!
//! ## Architecture
//!
//! ```text
//! GET request → local tier → remote tier → loader (system of record)
//!                   ↓             ↓              ↓
//!               <1µs latency  ~5ms latency   ~50ms latency
//!
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │     Instance 1      │     │     Instance 2      │
//! │                     │     │                     │
//! │  TieredCache        │     │  TieredCache        │
//! │       │             │     │        ▲            │
//! │       ▼             │     │        │            │
//! │  Broadcaster ───────┼────►│  Broadcaster ───────┘
//! │                     │     │                     │
//! └─────────────────────┘     └─────────────────────┘
//!              │                      ▲
//!              └───► pub/sub channel ─┘
//! ```
//!
//! ## Components
//!
//! - [`TieredCache`] — composes the tiers into one logical cache with
//!   read-through and write-through rules
//! - [`Broadcaster`] — publishes and applies cross-instance invalidation
//!   and update events, with echo suppression
//! - refresh scheduling — per-key background reload of hot keys, with a
//!   shared-timestamp + distributed-lock protocol so at most one instance
//!   refreshes a key per cycle
//! - [`BloomFilter`] — probabilistic membership filter with hot rebuild,
//!   for keys known not to exist
//! - [`CacheContext`] — the explicit composition root: shared
//!   collaborators plus the by-name cache registry
//!
//! ## Consistency model
//!
//! The remote tier is ground truth. Broadcasts are best-effort: an
//! instance that misses one serves its stale local value until local TTL
//! expiry or the next refresh cycle. Deployments that cannot tolerate that
//! bound should shorten the local TTL rather than rely on delivery.

pub mod broadcast;
pub mod builder;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod filter;
pub mod metrics;
mod refresh;

pub use broadcast::{BroadcastMessage, Broadcaster, MessageKind};
pub use builder::CacheBuilder;
pub use config::{
    CacheConfig, FilterConfig, LocalTierSettings, RefreshPolicy, RemoteTierSettings,
};
pub use context::{CacheContext, CacheContextBuilder};
pub use coordinator::{CacheStats, TieredCache};
pub use filter::BloomFilter;

pub use stratus_core::{
    CacheError, DisplayKeyEncoder, DistributedLock, FilterStore, FnLoader, JsonCodec, KeyEncoder,
    Loader, LocalTier, MemoryBus, MemoryFilterStore, MemoryLockTable, MemoryRemote, MemoryTier,
    MsgPackCodec, PubSubChannel, RemoteTier, ValueCodec, loader_fn,
};
