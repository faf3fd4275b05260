//! Units of work and their cancellation.
//!
//! A [`RequestScope`] stands for one bounded piece of work, typically one
//! inbound request. It owns the [`LoaderRegistry`] used during that work and
//! is passed explicitly down the call chain; nothing about it is global. When
//! the scope is cancelled or dropped, every caller still waiting on one of its
//! loaders is released with [`LoadError::Cancelled`](crate::LoadError::Cancelled).

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::error::Elapsed;
use tracing::debug;
use uuid::Uuid;

use crate::batch_fn::BatchFn;
use crate::error::RegistryError;
use crate::loader::Loader;
use crate::registry::LoaderRegistry;

/// Observes the cancellation of a [`RequestScope`].
///
/// Cheap to clone. A signal not tied to any scope never fires.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that is never raised.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    /// `true` once the scope was cancelled or has gone away.
    pub fn is_cancelled(&self) -> bool {
        match &self.receiver {
            None => false,
            Some(receiver) => *receiver.borrow() || receiver.has_changed().is_err(),
        }
    }

    /// Completes when the scope is cancelled or dropped.
    pub async fn cancelled(&self) {
        match &self.receiver {
            None => std::future::pending::<()>().await,
            Some(receiver) => {
                let mut receiver = receiver.clone();
                // Err means the scope is gone, which ends the work just the same
                let _ = receiver.wait_for(|cancelled| *cancelled).await;
            }
        }
    }
}

/// One unit of work.
///
/// # Example
///
/// ```ignore
/// let mut scope = RequestScope::new();
/// let registry = LoaderRegistry::builder(LoaderConfig::default())
///     .register(Keyed::new(UserBatch::new(store)))
///     .build(&scope);
/// scope.attach(registry)?;
///
/// let author = scope.loader::<UserLoaderFn>()?.load(post.user_id).await?;
/// ```
pub struct RequestScope {
    id: Uuid,
    cancel: watch::Sender<bool>,
    registry: Option<LoaderRegistry>,
}

impl RequestScope {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            cancel,
            registry: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            receiver: Some(self.cancel.subscribe()),
        }
    }

    /// Ends the unit of work early. Waiting callers are released at once.
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            debug!(scope_id = %self.id, "scope cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Attaches the registry this unit of work will use.
    ///
    /// A scope takes exactly one registry, and only one that was built for it.
    pub fn attach(&mut self, registry: LoaderRegistry) -> Result<(), RegistryError> {
        if self.registry.is_some() {
            return Err(RegistryError::AlreadyAttached { scope_id: self.id });
        }
        if registry.scope_id() != self.id {
            return Err(RegistryError::ScopeMismatch {
                expected: self.id,
                got: registry.scope_id(),
            });
        }
        self.registry = Some(registry);
        Ok(())
    }

    pub fn registry(&self) -> Result<&LoaderRegistry, RegistryError> {
        self.registry.as_ref().ok_or(RegistryError::NotAttached)
    }

    /// Looks up the loader serving batch function `F`.
    ///
    /// Fails when no registry was attached or when `F` was never registered.
    /// Both are wiring defects, not data conditions.
    pub fn loader<F: BatchFn>(&self) -> Result<&Loader<F>, RegistryError> {
        self.registry()?.loader::<F>()
    }

    /// Runs `future` as part of this unit of work, bounded by `duration`.
    ///
    /// If the time runs out the scope is cancelled, so anyone else still
    /// waiting on its loaders is released too. Batches that were already
    /// dispatched are left to finish.
    pub async fn run_with_timeout<T>(
        &self,
        duration: Duration,
        future: impl Future<Output = T>,
    ) -> Result<T, Elapsed> {
        let result = tokio::time::timeout(duration, future).await;
        if result.is_err() {
            debug!(scope_id = %self.id, ?duration, "scope timed out");
            self.cancel();
        }
        result
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.cancel();
    }
}
