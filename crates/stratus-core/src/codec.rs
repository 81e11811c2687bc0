//! Key and value conversion collaborators.
//!
//! Keys are normalized to strings before they reach any tier; values are
//! serialized to bytes only when crossing the remote-tier boundary. Both
//! conversions are treated as total, side-effect-free functions by the
//! engine.

use std::fmt::Display;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Converts an application key type to its string cache-key form.
///
/// The engine prefixes the result with the cache name, so encoders only
/// need to produce a stable, unique representation of the key itself.
pub trait KeyEncoder<K>: Send + Sync {
    /// Encode a key.
    fn encode(&self, key: &K) -> String;
}

/// [`KeyEncoder`] for any `Display` key type.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayKeyEncoder;

impl<K: Display> KeyEncoder<K> for DisplayKeyEncoder {
    fn encode(&self, key: &K) -> String {
        key.to_string()
    }
}

/// Converts values to and from the remote tier's byte representation.
pub trait ValueCodec<V>: Send + Sync {
    /// Encode a value to bytes.
    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError>;

    /// Decode a value from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError>;
}

/// MessagePack codec — compact binary encoding for cached values.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for MsgPackCodec {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec(value).map_err(|e| CacheError::codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::codec(e.to_string()))
    }
}

/// JSON codec — human-readable encoding, useful when cached values are
/// inspected directly in the remote store.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for JsonCodec {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::codec(e.to_string()))
    }
}
