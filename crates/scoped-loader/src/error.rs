//! Error types for loaders, registries and scopes.

use thiserror::Error;
use uuid::Uuid;

/// What a single key resolves to.
///
/// * `Ok(Some(value))` - the entity exists
/// * `Ok(None)` - the entity does not exist (not an error)
/// * `Err(_)` - the fetch failed or the wait was abandoned
pub type Outcome<V, E> = Result<Option<V>, LoadError<E>>;

/// Reasons a key could not be resolved to a value or an absence.
///
/// `E` is the error type of the batch function. Every variant is `Clone`
/// because one outcome is memoized and fanned out to every waiter of a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The batch function reported an error for this key only.
    #[error("fetch failed: {0}")]
    Fetch(E),

    /// The batch function failed as a whole; every key of the dispatch gets it.
    #[error("batch fetch failed: {0}")]
    Batch(E),

    /// The batch function broke the positional contract.
    #[error("batch function returned {got} outcomes for {expected} keys")]
    LengthMismatch { expected: usize, got: usize },

    /// The batch function panicked while loading this key's dispatch.
    #[error("batch function panicked")]
    Panicked,

    /// The unit of work was cancelled before the key resolved.
    #[error("load cancelled with its scope")]
    Cancelled,

    /// The loader went away without ever resolving the key.
    #[error("loader closed before the key resolved")]
    Closed,
}

impl<E> LoadError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }

    /// The error reported by the batch function, per-key or whole-batch.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            LoadError::Fetch(e) | LoadError::Batch(e) => Some(e),
            _ => None,
        }
    }
}

/// Wiring defects: a loader was asked for where none was configured.
///
/// These never describe data. Callers should surface them loudly instead of
/// falling back to unbatched fetches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no loader registry attached to the scope")]
    NotAttached,

    #[error("no loader configured for {entity}")]
    NotConfigured { entity: &'static str },

    #[error("scope {scope_id} already has a loader registry attached")]
    AlreadyAttached { scope_id: Uuid },

    #[error("registry built for scope {got} cannot be attached to scope {expected}")]
    ScopeMismatch { expected: Uuid, got: Uuid },
}

/// Error of a lookup-then-load through a [`RequestScope`](crate::RequestScope).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopedLoadError<E> {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Load(#[from] LoadError<E>),
}

/// Splits positional outcomes into the `(values, errors)` pair.
///
/// Both vectors have the input's length. A position holds either a value, an
/// error, or neither (not found).
pub fn partition<V, E>(outcomes: Vec<Outcome<V, E>>) -> (Vec<Option<V>>, Vec<Option<LoadError<E>>>) {
    outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Ok(value) => (value, None),
            Err(e) => (None, Some(e)),
        })
        .unzip()
}
