use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;

/// Outcomes of one dispatch, positionally aligned with its keys.
///
/// The outer `Err` is a whole-batch failure. Inside, `Ok(None)` marks a key
/// whose entity does not exist and `Err` a failure of that key alone.
pub type BatchResult<V, E> = Result<Vec<Result<Option<V>, E>>, E>;

/// Fetches many keys of one entity type in a single call.
///
/// This is the only interface a backing store has to implement to be served
/// through a [`Loader`](crate::Loader). Every call receives a deduplicated
/// slice of keys, in the order they were first requested, and never more than
/// the configured batch capacity.
///
/// # Contract
///
/// The returned vector must have exactly `keys.len()` entries and entry `i`
/// must describe `keys[i]`. A batch that violates this resolves every one of
/// its keys to [`LoadError::LengthMismatch`](crate::LoadError::LengthMismatch).
///
/// Implementations may be called concurrently from independent loaders, so
/// they must not rely on exclusive access to shared resources.
///
/// # Example
///
/// ```ignore
/// use scoped_loader::{BatchFn, BatchResult};
/// use async_trait::async_trait;
///
/// struct Squares;
///
/// #[async_trait]
/// impl BatchFn for Squares {
///     type Key = u64;
///     type Value = u64;
///     type Error = String;
///
///     async fn load(&self, keys: &[u64]) -> BatchResult<u64, String> {
///         Ok(keys.iter().map(|k| Ok(Some(k * k))).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchFn: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: Clone + Debug + Display + Send + Sync + 'static;

    async fn load(&self, keys: &[Self::Key]) -> BatchResult<Self::Value, Self::Error>;
}

/// A batch function backed by a "fetch everything matching these keys" query.
///
/// The query returns only the rows it found, keyed by identifier; wrap the
/// implementation in [`Keyed`] to use it as a [`BatchFn`]. Keys missing from
/// the map resolve as not found.
#[async_trait]
pub trait KeyedBatchFn: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: Clone + Debug + Display + Send + Sync + 'static;

    async fn load_map(&self, keys: &[Self::Key]) -> Result<HashMap<Self::Key, Self::Value>, Self::Error>;
}

/// Adapts a [`KeyedBatchFn`] to the positional [`BatchFn`] contract.
pub struct Keyed<F>(pub F);

impl<F> Keyed<F> {
    pub fn new(inner: F) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> &F {
        &self.0
    }
}

#[async_trait]
impl<F: KeyedBatchFn> BatchFn for Keyed<F> {
    type Key = F::Key;
    type Value = F::Value;
    type Error = F::Error;

    async fn load(&self, keys: &[Self::Key]) -> BatchResult<Self::Value, Self::Error> {
        let found = self.0.load_map(keys).await?;
        Ok(align_outcomes(keys, found))
    }
}

/// Lines a keyed query result up with the requested keys.
///
/// Present keys become values, missing keys become absences. A key requested
/// more than once gets the same value at each of its positions.
pub fn align_outcomes<K, V, E>(keys: &[K], found: HashMap<K, V>) -> Vec<Result<Option<V>, E>>
where
    K: Eq + Hash,
    V: Clone,
{
    keys.iter().map(|key| Ok(found.get(key).cloned())).collect()
}
