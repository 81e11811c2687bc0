//! Collaborator contracts for the Stratus cache coordination layer.
//!
//! This crate defines the seams the coordination engine composes over:
//!
//! - [`LocalTier`] — bounded, TTL-capable in-process map (value-typed)
//! - [`RemoteTier`] — shared out-of-process key-value store (byte-typed)
//! - [`PubSubChannel`] — best-effort fan-out message bus
//! - [`DistributedLock`] — named mutual exclusion with lease semantics
//! - [`Loader`] — application callback loading values from the system of record
//! - [`FilterStore`] — bit-array backend for probabilistic membership filters
//! - [`KeyEncoder`] / [`ValueCodec`] — key-to-string and value-to-bytes conversion
//!
//! Implementations must be thread-safe (`Send + Sync`); the engine invokes
//! them concurrently from caller tasks, broadcast listener tasks, and
//! refresh timer tasks.
//!
//! The [`memory`] module provides in-process implementations of every
//! contract, used both for single-instance deployments and for
//! deterministic multi-instance tests. Redis-backed implementations live in
//! the `stratus-redis` crate.

pub mod bus;
pub mod codec;
pub mod error;
pub mod filter_store;
pub mod loader;
pub mod lock;
pub mod memory;
pub mod tier;

pub use bus::{MessageHandler, PubSubChannel, SubscriptionId};
pub use codec::{DisplayKeyEncoder, JsonCodec, KeyEncoder, MsgPackCodec, ValueCodec};
pub use error::CacheError;
pub use filter_store::FilterStore;
pub use loader::{FnLoader, Loader, loader_fn};
pub use lock::DistributedLock;
pub use memory::{MemoryBus, MemoryFilterStore, MemoryLockTable, MemoryRemote, MemoryTier};
pub use tier::{LocalTier, RemoteTier};
