use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{LoadError, Outcome};

/// # PendingSlot
///
/// The single-assignment result slot of one key that has been requested but
/// not resolved yet.
///
/// Every caller that asks for the key while it is queued or in flight is
/// attached to the same slot and receives a clone of the one outcome the slot
/// is resolved with. Resolving consumes the slot, so it can only happen once.
pub(crate) struct PendingSlot<V, E> {
    /// One channel per attached caller
    senders: Vec<oneshot::Sender<Outcome<V, E>>>,
}

impl<V: Clone, E: Clone> PendingSlot<V, E> {
    pub fn new() -> Self {
        Self { senders: vec![] }
    }

    /// Attaches a new caller and returns the future it waits on.
    pub fn attach(&mut self) -> Waiter<V, E> {
        let (tx, rx) = oneshot::channel();
        self.senders.push(tx);
        Waiter::new(rx)
    }

    #[cfg(test)]
    pub fn waiters(&self) -> usize {
        self.senders.len()
    }

    /// Delivers `outcome` to every attached caller still listening.
    ///
    /// # Returns
    ///
    /// The number of callers that received the outcome. Callers that gave up
    /// waiting are skipped.
    pub fn resolve(self, outcome: Outcome<V, E>) -> usize {
        let mut delivered = 0;
        for sender in self.senders {
            if sender.send(outcome.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// # Waiter
///
/// An asynchronous wrapper around the receiving half of a [`PendingSlot`]
/// attachment. Resolves to [`LoadError::Closed`] if the slot is dropped
/// without ever being resolved.
pub(crate) struct Waiter<V, E> {
    receiver: oneshot::Receiver<Outcome<V, E>>,
}

impl<V, E> Waiter<V, E> {
    fn new(receiver: oneshot::Receiver<Outcome<V, E>>) -> Self {
        Self { receiver }
    }
}

impl<V, E> Future for Waiter<V, E> {
    type Output = Outcome<V, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(LoadError::Closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_every_waiter_receives_the_outcome() {
        let mut slot: PendingSlot<u32, String> = PendingSlot::new();
        let first = slot.attach();
        let second = slot.attach();
        assert_eq!(slot.waiters(), 2);

        let delivered = slot.resolve(Ok(Some(7)));

        assert_eq!(delivered, 2);
        assert_eq!(first.await, Ok(Some(7)));
        assert_eq!(second.await, Ok(Some(7)));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let mut slot: PendingSlot<u32, String> = PendingSlot::new();
        let kept = slot.attach();
        drop(slot.attach());

        let delivered = slot.resolve(Err(LoadError::Fetch("down".to_string())));

        assert_eq!(delivered, 1);
        assert_eq!(kept.await, Err(LoadError::Fetch("down".to_string())));
    }

    #[tokio::test]
    async fn test_dropped_slot_closes_waiter() {
        let mut slot: PendingSlot<u32, String> = PendingSlot::new();
        let waiter = slot.attach();
        drop(slot);

        assert_eq!(waiter.await, Err(LoadError::Closed));
    }

    #[test]
    fn test_resolve_without_waiters() {
        let slot: PendingSlot<u32, String> = PendingSlot::new();
        assert_eq!(slot.resolve(Ok(None)), 0);
    }
}
