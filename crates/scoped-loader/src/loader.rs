use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::trace;

use crate::batch_fn::BatchFn;
use crate::config::LoaderConfig;
use crate::dispatch::Dispatcher;
use crate::error::{LoadError, Outcome};
use crate::pending::{PendingSlot, Waiter};
use crate::scope::Cancellation;

type KeyOf<F> = <F as BatchFn>::Key;
type ValueOf<F> = <F as BatchFn>::Value;
type ErrorOf<F> = <F as BatchFn>::Error;

/// Memoization table entry of one key.
pub(crate) enum Entry<V, E> {
    /// Queued or in flight; callers attach to the slot.
    Pending(PendingSlot<V, E>),
    /// Write-once outcome served to every later caller.
    Resolved(Outcome<V, E>),
}

/// Mutable state of a loader, always accessed under its lock.
pub(crate) struct LoaderState<F: BatchFn> {
    /// One entry per key ever requested from this loader
    pub(crate) entries: HashMap<KeyOf<F>, Entry<ValueOf<F>, ErrorOf<F>>>,

    /// Undispatched keys, in the order they were first requested
    pub(crate) queue: Vec<KeyOf<F>>,
}

impl<F: BatchFn> LoaderState<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            queue: vec![],
        }
    }

    /// Records the outcome of `key` and releases its waiters.
    ///
    /// # Returns
    ///
    /// How many waiters received the outcome.
    pub(crate) fn resolve(&mut self, key: KeyOf<F>, outcome: Outcome<ValueOf<F>, ErrorOf<F>>) -> usize {
        match self.entries.insert(key.clone(), Entry::Resolved(outcome.clone())) {
            Some(Entry::Pending(slot)) => slot.resolve(outcome),
            // resolved entries are never overwritten
            Some(resolved @ Entry::Resolved(_)) => {
                self.entries.insert(key, resolved);
                0
            }
            None => 0,
        }
    }
}

/// State shared between a loader's handles, its dispatch loop and the batches
/// in flight.
pub(crate) struct Shared<F: BatchFn> {
    pub(crate) batch_fn: F,
    pub(crate) config: LoaderConfig,
    pub(crate) entity: &'static str,
    pub(crate) state: Mutex<LoaderState<F>>,
}

struct LoaderInner<F: BatchFn> {
    shared: Arc<Shared<F>>,
    cancellation: Cancellation,
    dispatcher: Dispatcher,
}

/// How one requested key will be answered.
enum Ticket<V, E> {
    Ready(Outcome<V, E>),
    Waiting(Waiter<V, E>),
}

/// Deduplicating, batching, memoizing front of one [`BatchFn`].
///
/// A loader belongs to a single unit of work. Within it, each distinct key is
/// handed to the batch function at most once, no matter how many callers ask
/// for it or when; the outcome (value, absence or error) is memoized and
/// served to every later caller. Dropping the last handle discards the
/// memoized state and stops the dispatcher.
///
/// Cloning is cheap and yields another handle to the same loader, so
/// concurrent tasks of one unit of work can share it.
///
/// # Dispatch
///
/// Keys that are not memoized are queued. A background task dispatches the
/// queue once the configured window after the first queued key has passed, or
/// immediately once the queue holds `max_batch_size` keys. Queues larger than
/// the capacity go out as several consecutive batches.
pub struct Loader<F: BatchFn> {
    inner: Arc<LoaderInner<F>>,
}

impl<F: BatchFn> Clone for Loader<F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<F: BatchFn> Loader<F> {
    /// Creates a loader that is not bound to any scope.
    ///
    /// Must be called from within a Tokio runtime; the dispatcher is spawned
    /// right away.
    pub fn new(batch_fn: F, config: LoaderConfig) -> Self {
        Self::with_cancellation(batch_fn, config, Cancellation::never())
    }

    /// Creates a loader whose waiters are released when `cancellation` fires.
    pub fn with_cancellation(batch_fn: F, config: LoaderConfig, cancellation: Cancellation) -> Self {
        let shared = Arc::new(Shared {
            batch_fn,
            config,
            entity: std::any::type_name::<F>(),
            state: Mutex::new(LoaderState::new()),
        });

        let dispatcher = Dispatcher::spawn(shared.clone(), cancellation.clone());

        Self {
            inner: Arc::new(LoaderInner {
                shared,
                cancellation,
                dispatcher,
            }),
        }
    }

    /// The batch function behind this loader.
    #[inline]
    pub fn batch_fn(&self) -> &F {
        &self.inner.shared.batch_fn
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.shared.config
    }

    /// Loads one key.
    ///
    /// Returns the memoized outcome if the key was resolved before, otherwise
    /// waits for the batch containing the key.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - the entity exists
    /// * `Ok(None)` - the batch function reported no such entity
    /// * `Err(_)` - the fetch failed, or the scope was cancelled while waiting
    pub async fn load(&self, key: F::Key) -> Outcome<F::Value, F::Error> {
        let mut tickets = self.enqueue(std::iter::once(key)).await;
        match tickets.pop() {
            Some(ticket) => self.redeem(ticket).await,
            None => Err(LoadError::Closed),
        }
    }

    /// Loads many keys at once.
    ///
    /// The result has one outcome per input key, in input order. Repeated keys
    /// are fetched once but reported at each of their positions. All keys are
    /// queued together, so they share dispatches as far as capacity allows.
    pub async fn load_many<I>(&self, keys: I) -> Vec<Outcome<F::Value, F::Error>>
    where
        I: IntoIterator<Item = F::Key>,
    {
        let tickets = self.enqueue(keys).await;
        join_all(tickets.into_iter().map(|ticket| self.redeem(ticket))).await
    }

    /// Seeds the memoization table with a known value.
    ///
    /// Only takes effect for keys this loader has never seen; queued, in-flight
    /// and resolved keys keep their outcome.
    ///
    /// # Returns
    ///
    /// `true` if the value was stored.
    pub async fn prime(&self, key: F::Key, value: F::Value) -> bool {
        let mut state = self.inner.shared.state.lock().await;
        if state.entries.contains_key(&key) {
            return false;
        }
        trace!(entity = self.inner.shared.entity, ?key, "primed");
        state.entries.insert(key, Entry::Resolved(Ok(Some(value))));
        true
    }

    /// Whether `key` has a memoized outcome.
    pub async fn is_memoized(&self, key: &F::Key) -> bool {
        let state = self.inner.shared.state.lock().await;
        matches!(state.entries.get(key), Some(Entry::Resolved(_)))
    }

    /// Registers interest in every key under one lock acquisition.
    async fn enqueue<I>(&self, keys: I) -> Vec<Ticket<F::Value, F::Error>>
    where
        I: IntoIterator<Item = F::Key>,
    {
        let shared = &self.inner.shared;
        let cancelled = self.inner.cancellation.is_cancelled();
        let mut queued = 0;

        let tickets = {
            let mut state = shared.state.lock().await;
            let mut tickets = vec![];
            for key in keys {
                let ticket = match state.entries.get_mut(&key) {
                    Some(Entry::Resolved(outcome)) => {
                        trace!(entity = shared.entity, ?key, "memoized");
                        Ticket::Ready(outcome.clone())
                    }
                    Some(Entry::Pending(slot)) => {
                        trace!(entity = shared.entity, ?key, "attached to pending key");
                        Ticket::Waiting(slot.attach())
                    }
                    None if cancelled => Ticket::Ready(Err(LoadError::Cancelled)),
                    None => {
                        let mut slot = PendingSlot::new();
                        let waiter = slot.attach();
                        state.entries.insert(key.clone(), Entry::Pending(slot));
                        state.queue.push(key);
                        queued += 1;
                        Ticket::Waiting(waiter)
                    }
                };
                tickets.push(ticket);
            }
            tickets
        };

        if queued > 0 {
            trace!(entity = shared.entity, queued, "keys queued");
            self.inner.dispatcher.notify();
        }
        tickets
    }

    async fn redeem(&self, ticket: Ticket<F::Value, F::Error>) -> Outcome<F::Value, F::Error> {
        match ticket {
            Ticket::Ready(outcome) => outcome,
            Ticket::Waiting(waiter) => {
                tokio::select! {
                    biased;
                    outcome = waiter => outcome,
                    _ = self.inner.cancellation.cancelled() => Err(LoadError::Cancelled),
                }
            }
        }
    }
}
