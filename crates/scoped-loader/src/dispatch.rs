use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::batch_fn::{BatchFn, BatchResult};
use crate::error::{LoadError, Outcome};
use crate::loader::{LoaderState, Shared};
use crate::scope::Cancellation;

/// The background task that dispatches one loader's queue.
///
/// Owned by the loader. Dropping it, which happens with the last loader
/// handle, tells the task to stop; batches already handed off still finish.
pub(crate) struct Dispatcher {
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
}

impl Dispatcher {
    /// Spawns the dispatch loop. Must be called from within a Tokio runtime.
    pub(crate) fn spawn<F: BatchFn>(shared: Arc<Shared<F>>, cancellation: Cancellation) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        tokio::spawn(dispatch_loop(
            shared,
            running.clone(),
            notifier.clone(),
            cancellation,
        ));

        Self { running, notifier }
    }

    /// Tells the loop that keys were queued.
    ///
    /// A notification sent while the loop is busy is kept for its next wait.
    pub(crate) fn notify(&self) {
        self.notifier.notify_one();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();
    }
}

/// Background loop that turns a loader's queue into batch function calls.
///
/// The first key queued into an empty queue opens a dispatch window of
/// `delay`. While the window is open, every time the queue reaches capacity a
/// full batch goes out at once. When the window closes the rest of the queue
/// goes out, split by capacity. Each batch runs in its own task, so a slow
/// fetch never holds back the next window.
///
/// The loop ends when the loader is dropped or the scope is cancelled. Keys
/// still queued at that point are never fetched.
async fn dispatch_loop<F: BatchFn>(
    shared: Arc<Shared<F>>,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
    cancellation: Cancellation,
) {
    let capacity = shared.config.batch_capacity();
    let delay = shared.config.delay;

    'rounds: loop {
        if !running.load(Ordering::SeqCst) || cancellation.is_cancelled() {
            break;
        }

        if shared.state.lock().await.queue.is_empty() {
            tokio::select! {
                _ = notifier.notified() => {}
                _ = cancellation.cancelled() => {}
            }
            continue;
        }

        let deadline = (!delay.is_zero()).then(|| Instant::now() + delay);
        loop {
            let remaining = dispatch_ready(&shared, capacity, false).await;
            if remaining == 0 {
                continue 'rounds;
            }

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break 'rounds,
                _ = notifier.notified() => {
                    if !running.load(Ordering::SeqCst) {
                        break 'rounds;
                    }
                }
                _ = wait_for_window(deadline) => {
                    dispatch_ready(&shared, capacity, true).await;
                    continue 'rounds;
                }
            }
        }
    }

    trace!(entity = shared.entity, "dispatch loop stopped");
}

/// Lets callers that are about to queue keys catch the current window.
///
/// Without a deadline the window lasts a single yield.
#[inline]
async fn wait_for_window(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => tokio::task::yield_now().await,
    }
}

/// Sends out every full batch, and with `flush` the partial one left after
/// them too.
///
/// # Returns
///
/// The number of keys still queued.
async fn dispatch_ready<F: BatchFn>(shared: &Arc<Shared<F>>, capacity: usize, flush: bool) -> usize {
    let (batches, remaining) = drain_batches(&shared.state, capacity, flush).await;
    for keys in batches {
        tokio::spawn(run_batch(shared.clone(), keys));
    }
    remaining
}

/// Takes batches of at most `capacity` keys off the front of the queue.
async fn drain_batches<F: BatchFn>(
    state: &Mutex<LoaderState<F>>,
    capacity: usize,
    flush: bool,
) -> (Vec<Vec<F::Key>>, usize) {
    let mut state = state.lock().await;
    let mut batches = vec![];
    while state.queue.len() >= capacity || (flush && !state.queue.is_empty()) {
        let items_to_take = std::cmp::min(capacity, state.queue.len());
        batches.push(state.queue.drain(0..items_to_take).collect());
    }
    (batches, state.queue.len())
}

/// Calls the batch function for one batch and fans the outcomes out.
pub(crate) async fn run_batch<F: BatchFn>(shared: Arc<Shared<F>>, keys: Vec<F::Key>) {
    debug!(
        entity = shared.entity,
        keys = keys.len(),
        max_batch_size = shared.config.batch_capacity(),
        "dispatching batch"
    );

    let result = AssertUnwindSafe(shared.batch_fn.load(&keys)).catch_unwind().await;
    let outcomes = settle(shared.entity, keys.len(), result);

    let mut state = shared.state.lock().await;
    for (key, outcome) in keys.into_iter().zip(outcomes) {
        if state.resolve(key.clone(), outcome) == 0 {
            trace!(entity = shared.entity, ?key, "resolved with nobody waiting");
        }
    }
}

/// Turns one batch function call into one outcome per key.
///
/// Whole-batch failures, contract violations and panics are copied to every
/// key; otherwise each key gets exactly what was reported for it.
fn settle<V, E>(
    entity: &str,
    expected: usize,
    result: Result<BatchResult<V, E>, Box<dyn Any + Send>>,
) -> Vec<Outcome<V, E>>
where
    V: Clone,
    E: Clone + std::fmt::Display,
{
    match result {
        Err(_) => {
            warn!(entity, keys = expected, "batch function panicked");
            vec![Err(LoadError::Panicked); expected]
        }
        Ok(Err(e)) => {
            debug!(entity, keys = expected, error = %e, "batch fetch failed");
            vec![Err(LoadError::Batch(e)); expected]
        }
        Ok(Ok(outcomes)) if outcomes.len() != expected => {
            warn!(
                entity,
                expected,
                got = outcomes.len(),
                "batch function returned the wrong number of outcomes"
            );
            vec![Err(LoadError::LengthMismatch { expected, got: outcomes.len() }); expected]
        }
        Ok(Ok(outcomes)) => outcomes
            .into_iter()
            .map(|outcome| outcome.map_err(LoadError::Fetch))
            .collect(),
    }
}
