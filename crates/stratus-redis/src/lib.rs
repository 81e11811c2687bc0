//! Redis-backed collaborators for the Stratus cache coordination layer.
//!
//! This crate implements every `stratus-core` contract on top of Redis:
//!
//! - [`RedisRemote`] — remote tier over a `deadpool_redis` pool
//! - [`RedisBus`] — pub/sub channel with a self-healing subscriber loop
//! - [`RedisLockManager`] — `SET NX PX` lock with token-checked release
//! - [`RedisFilterStore`] — bitmap store with `RENAME` for atomic swaps
//!
//! All components share one connection pool; the subscriber additionally
//! opens a dedicated client connection, since pooled connections cannot
//! enter subscriber mode.

pub mod bus;
pub mod filter_store;
pub mod lock;
pub mod remote;
mod settings;

pub use bus::RedisBus;
pub use filter_store::RedisFilterStore;
pub use lock::RedisLockManager;
pub use remote::RedisRemote;
pub use settings::{RedisSettings, create_pool};
