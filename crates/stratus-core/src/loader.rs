//! Loader contract: the application callback that reads the system of
//! record on a double miss or a refresh cycle.
//!
//! Loader failures are always caught and logged by the engine, never
//! propagated to callers — a failed load degrades to "no value produced
//! this cycle" and leaves any previously cached value untouched.

use std::future::Future;

use async_trait::async_trait;

/// Polymorphic value loader.
///
/// `load` returning `Ok(None)` means the key does not exist in the system
/// of record; the engine never stores such results.
#[async_trait]
pub trait Loader<K, V>: Send + Sync
where
    K: Clone + Send + Sync,
    V: Send,
{
    /// Load a single value.
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;

    /// Load several values. Keys with no value are absent from the result.
    ///
    /// The default implementation loads sequentially; batch-capable
    /// backends should override it.
    async fn load_many(&self, keys: &[K]) -> anyhow::Result<Vec<(K, V)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key).await? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }
}

/// [`Loader`] backed by an async closure.
///
/// Built through [`loader_fn`]; useful when the load path is a single call
/// into an existing client rather than a dedicated type.
pub struct FnLoader<F> {
    f: F,
}

/// Wrap an async closure as a [`Loader`].
///
/// ```ignore
/// let loader = loader_fn(|id: u64| async move { Ok(db.find(id).await?) });
/// ```
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader { f }
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F>
where
    K: Clone + Send + Sync,
    V: Send,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        (self.f)(key.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_loader_delegates() {
        let loader = loader_fn(|key: u32| async move {
            if key == 7 {
                Ok(Some(format!("value-{key}")))
            } else {
                Ok(None)
            }
        });

        assert_eq!(loader.load(&7).await.unwrap(), Some("value-7".to_string()));
        assert_eq!(loader.load(&8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_load_many_skips_absent_keys() {
        let loader = loader_fn(|key: u32| async move {
            if key % 2 == 0 { Ok(Some(key * 10)) } else { Ok(None) }
        });

        let loaded = loader.load_many(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(loaded, vec![(2, 20), (4, 40)]);
    }
}
