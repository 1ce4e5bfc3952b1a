//! The bounded mediator sitting between a fast producer and a slow consumer.
//!
//! The mediator owns the only state shared between the two sides: the
//! policy-retained items, the drop counter and the completion flag. Every
//! operation takes a short mutex-guarded critical section; nothing ever
//! awaits while holding the lock, so `offer` never blocks the producer on
//! the consumer regardless of policy.
//!
//! ```text
//!            offer()                      take()
//! Producer ──────────▶ [ Buffer | Slot | Cell ] ──────────▶ Consumer
//!                            ▲                       │
//!                            └──── cancel() ─────────┘
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_core::Stream;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::policy::BackpressurePolicy;

/// Lifecycle of a mediator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediatorState {
    /// Nothing offered yet
    Idle,
    /// Items are flowing
    Running,
    /// Completion was signalled and every retained item was handed out.
    ///
    /// Reached directly from `Idle` when completion is signalled before any
    /// offer, as with a producer that emits nothing.
    Completed,
    /// Torn down by the controller
    Cancelled,
    /// The producer reported a fault
    Failed,
}

impl MediatorState {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MediatorState::Completed | MediatorState::Cancelled | MediatorState::Failed
        )
    }
}

/// Result of a single `offer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The item is now pending for the consumer
    Accepted,
    /// The slot was occupied, the offered item was discarded (drop policy)
    Dropped,
    /// The offered item superseded an unconsumed one (latest policy)
    Replaced,
    /// The mediator no longer accepts items
    Rejected,
}

/// What the consumer receives from `take`
#[derive(Debug)]
pub enum Delivery<T> {
    /// The next item
    Item(T),
    /// End of stream; every retained item was delivered
    Complete,
    /// The run was cancelled
    Cancelled,
    /// The producer failed
    Failed(Error),
}

impl<T> Delivery<T> {
    /// Whether this is one of the terminal markers
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Delivery::Item(_))
    }
}

enum Retained<T> {
    Queue(VecDeque<T>),
    Slot(Option<T>),
    Cell(Option<T>),
}

impl<T> Retained<T> {
    fn for_policy(policy: BackpressurePolicy) -> Self {
        match policy {
            BackpressurePolicy::Buffer => Retained::Queue(VecDeque::new()),
            BackpressurePolicy::Drop => Retained::Slot(None),
            BackpressurePolicy::Latest => Retained::Cell(None),
        }
    }

    fn pop(&mut self) -> Option<T> {
        match self {
            Retained::Queue(queue) => queue.pop_front(),
            Retained::Slot(slot) | Retained::Cell(slot) => slot.take(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Retained::Queue(queue) => queue.len(),
            Retained::Slot(slot) | Retained::Cell(slot) => usize::from(slot.is_some()),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self) {
        match self {
            // Release the backing allocation too; a cancelled buffer run may hold millions
            Retained::Queue(queue) => *queue = VecDeque::new(),
            Retained::Slot(slot) | Retained::Cell(slot) => *slot = None,
        }
    }
}

struct Inner<T> {
    state: MediatorState,
    retained: Retained<T>,
    completion_signalled: bool,
    terminal_delivered: bool,
    failure: Option<Error>,
    offered: u64,
    delivered: u64,
    dropped: u64,
}

/// Policy-enforcing hand-off point between one producer and one consumer.
///
/// Share it between both sides behind an `Arc`.
pub struct Mediator<T> {
    policy: BackpressurePolicy,
    inner: Mutex<Inner<T>>,
    item_ready: Notify,
    shutdown: CancellationToken,
}

impl<T> Mediator<T> {
    /// Create an idle mediator enforcing `policy`
    pub fn new(policy: BackpressurePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner {
                state: MediatorState::Idle,
                retained: Retained::for_policy(policy),
                completion_signalled: false,
                terminal_delivered: false,
                failure: None,
                offered: 0,
                delivered: 0,
                dropped: 0,
            }),
            item_ready: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // The critical sections never panic half-way, so a poisoned guard is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an item to the mediator. Never waits for the consumer.
    pub fn offer(&self, item: T) -> Offer {
        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            if inner.state.is_terminal() || inner.completion_signalled {
                if inner.completion_signalled && !inner.state.is_terminal() {
                    warn!(policy = %self.policy, "offer after completion was signalled");
                }
                return Offer::Rejected;
            }
            if inner.state == MediatorState::Idle {
                debug!(policy = %self.policy, "mediator running");
                inner.state = MediatorState::Running;
            }
            inner.offered += 1;

            match &mut inner.retained {
                Retained::Queue(queue) => {
                    queue.push_back(item);
                    Offer::Accepted
                }
                Retained::Slot(slot) => {
                    if slot.is_some() {
                        inner.dropped += 1;
                        Offer::Dropped
                    } else {
                        *slot = Some(item);
                        Offer::Accepted
                    }
                }
                Retained::Cell(cell) => {
                    if cell.replace(item).is_some() {
                        inner.dropped += 1;
                        Offer::Replaced
                    } else {
                        Offer::Accepted
                    }
                }
            }
        };

        metrics::record_offer(self.policy, outcome);
        if outcome != Offer::Dropped {
            self.item_ready.notify_one();
        }
        outcome
    }

    /// Wait for the next delivery.
    ///
    /// Terminal markers are handed out exactly once; calling `take` again
    /// after one was delivered yields `Error::Closed`.
    pub async fn take(&self) -> Result<Delivery<T>> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.next_delivery()? {
                return Ok(delivery);
            }

            tokio::select! {
                biased;
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Non-waiting `take`: `Ok(None)` when nothing is available yet
    pub fn try_take(&self) -> Result<Option<Delivery<T>>> {
        self.next_delivery()
    }

    fn next_delivery(&self) -> Result<Option<Delivery<T>>> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.terminal_delivered {
            return Err(Error::Closed);
        }

        match inner.state {
            MediatorState::Cancelled => {
                inner.terminal_delivered = true;
                return Ok(Some(Delivery::Cancelled));
            }
            MediatorState::Failed => {
                inner.terminal_delivered = true;
                let error = inner
                    .failure
                    .take()
                    .unwrap_or_else(|| Error::custom("producer failed"));
                return Ok(Some(Delivery::Failed(error)));
            }
            _ => {}
        }

        if let Some(item) = inner.retained.pop() {
            inner.delivered += 1;
            if inner.completion_signalled && inner.retained.is_empty() {
                debug!(policy = %self.policy, "mediator drained");
                inner.state = MediatorState::Completed;
            }
            return Ok(Some(Delivery::Item(item)));
        }

        if inner.state == MediatorState::Completed {
            inner.terminal_delivered = true;
            return Ok(Some(Delivery::Complete));
        }

        Ok(None)
    }

    /// Mark that no more items will arrive. Idempotent.
    pub fn signal_complete(&self) {
        {
            let mut inner = self.lock();
            if inner.completion_signalled || inner.state.is_terminal() {
                return;
            }
            inner.completion_signalled = true;
            if inner.retained.is_empty() {
                inner.state = MediatorState::Completed;
            }
            debug!(
                policy = %self.policy,
                offered = inner.offered,
                pending = inner.retained.len(),
                "completion signalled"
            );
        }
        self.item_ready.notify_one();
    }

    /// Tear down: drop retained items, reject further offers and wake a
    /// pending `take`. Idempotent; a no-op once the mediator is terminal.
    pub fn cancel(&self) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = MediatorState::Cancelled;
            inner.retained.clear();
            debug!(policy = %self.policy, offered = inner.offered, "mediator cancelled");
        }
        self.shutdown.cancel();
        self.item_ready.notify_one();
    }

    /// Forward a producer fault to the consumer as a terminal delivery
    pub fn fail(&self, error: Error) {
        if error.is_cancelled() {
            self.cancel();
            return;
        }
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                trace!(policy = %self.policy, %error, "ignoring failure on terminal mediator");
                return;
            }
            warn!(policy = %self.policy, %error, "producer failed");
            inner.state = MediatorState::Failed;
            inner.retained.clear();
            inner.failure = Some(error);
        }
        self.shutdown.cancel();
        self.item_ready.notify_one();
    }

    /// The policy this mediator enforces
    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Current lifecycle state
    pub fn state(&self) -> MediatorState {
        self.lock().state
    }

    /// Whether the mediator was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state() == MediatorState::Cancelled
    }

    /// Whether the producer side should stop: cancelled or failed.
    ///
    /// Lock-free; the producer checks this before every emission.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the mediator is cancelled or failed
    pub fn shut_down(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Items discarded by the drop and latest policies
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Items offered while the mediator accepted them
    pub fn offered(&self) -> u64 {
        self.lock().offered
    }

    /// Items handed to the consumer
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    /// Items retained and not yet taken
    pub fn pending(&self) -> usize {
        self.lock().retained.len()
    }
}

impl<T: Send + 'static> Mediator<T> {
    /// View the consumer side as a stream of items; it ends at the first
    /// terminal delivery
    pub fn into_stream(self: Arc<Self>) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |mediator| async move {
            match mediator.take().await {
                Ok(Delivery::Item(item)) => Some((item, mediator)),
                _ => None,
            }
        })
    }
}

impl<T> std::fmt::Debug for Mediator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Mediator")
            .field("policy", &self.policy)
            .field("state", &inner.state)
            .field("pending", &inner.retained.len())
            .field("offered", &inner.offered)
            .field("delivered", &inner.delivered)
            .field("dropped", &inner.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    fn drain(mediator: &Mediator<u64>) -> Vec<u64> {
        let mut items = Vec::new();
        while let Ok(Some(Delivery::Item(item))) = mediator.try_take() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_buffer_keeps_everything_in_order() {
        let mediator = Mediator::new(BackpressurePolicy::Buffer);
        for i in 0..1000 {
            assert_eq!(mediator.offer(i), Offer::Accepted);
        }
        assert_eq!(mediator.pending(), 1000);
        assert_eq!(drain(&mediator), (0..1000).collect::<Vec<_>>());
        assert_eq!(mediator.dropped(), 0);
    }

    #[test]
    fn test_drop_keeps_first_occupant() {
        let mediator = Mediator::new(BackpressurePolicy::Drop);
        assert_eq!(mediator.offer(0), Offer::Accepted);
        for i in 1..5 {
            assert_eq!(mediator.offer(i), Offer::Dropped);
        }
        assert_eq!(mediator.dropped(), 4);
        assert_eq!(drain(&mediator), vec![0]);

        // The slot is free again
        assert_eq!(mediator.offer(5), Offer::Accepted);
        assert_eq!(drain(&mediator), vec![5]);
    }

    #[test]
    fn test_latest_overwrites_pending_value() {
        let mediator = Mediator::new(BackpressurePolicy::Latest);
        assert_eq!(mediator.offer(0), Offer::Accepted);
        for i in 1..5 {
            assert_eq!(mediator.offer(i), Offer::Replaced);
        }
        assert_eq!(mediator.dropped(), 4);
        assert_eq!(drain(&mediator), vec![4]);
    }

    #[test]
    fn test_state_transitions() {
        let mediator = Mediator::new(BackpressurePolicy::Buffer);
        assert_eq!(mediator.state(), MediatorState::Idle);

        mediator.offer(1);
        assert_eq!(mediator.state(), MediatorState::Running);

        mediator.signal_complete();
        // Still one item to hand out
        assert_eq!(mediator.state(), MediatorState::Running);

        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Item(1)))));
        assert_eq!(mediator.state(), MediatorState::Completed);
        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Complete))));
        assert!(matches!(mediator.try_take(), Err(Error::Closed)));
    }

    #[test]
    fn test_signal_complete_is_idempotent() {
        let mediator = Mediator::<u64>::new(BackpressurePolicy::Drop);
        mediator.signal_complete();
        mediator.signal_complete();
        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Complete))));
        assert!(matches!(mediator.try_take(), Err(Error::Closed)));
    }

    #[test]
    fn test_completion_before_any_offer() {
        let mediator = Mediator::<u64>::new(BackpressurePolicy::Latest);
        mediator.signal_complete();
        assert_eq!(mediator.state(), MediatorState::Completed);
        assert_eq!(mediator.offer(1), Offer::Rejected);
        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Complete))));
    }

    #[test]
    fn test_offer_after_completion_is_rejected() {
        let mediator = Mediator::new(BackpressurePolicy::Buffer);
        mediator.offer(1);
        mediator.signal_complete();
        assert_eq!(mediator.offer(2), Offer::Rejected);
        assert_eq!(drain(&mediator), vec![1]);
    }

    #[test]
    fn test_pending_take_wakes_on_offer() {
        let mediator = Mediator::new(BackpressurePolicy::Latest);
        let mut take = task::spawn(mediator.take());
        assert_pending!(take.poll());

        mediator.offer(7);
        assert!(take.is_woken());
        match assert_ready!(take.poll()) {
            Ok(Delivery::Item(7)) => {}
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_unblocks_pending_take() {
        let mediator = Mediator::<u64>::new(BackpressurePolicy::Buffer);
        let mut take = task::spawn(mediator.take());
        assert_pending!(take.poll());

        mediator.cancel();
        assert!(take.is_woken());
        assert!(matches!(assert_ready!(take.poll()), Ok(Delivery::Cancelled)));
    }

    #[test]
    fn test_cancel_twice_matches_cancel_once() {
        let mediator = Mediator::new(BackpressurePolicy::Buffer);
        mediator.offer(1);
        mediator.offer(2);

        mediator.cancel();
        let after_first = (mediator.state(), mediator.pending(), mediator.dropped());
        mediator.cancel();
        let after_second = (mediator.state(), mediator.pending(), mediator.dropped());

        assert_eq!(after_first, after_second);
        assert_eq!(after_first, (MediatorState::Cancelled, 0, 0));
        assert!(mediator.is_shut_down());
        assert_eq!(mediator.offer(3), Offer::Rejected);
        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Cancelled))));
        assert!(matches!(mediator.try_take(), Err(Error::Closed)));
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let mediator = Mediator::<u64>::new(BackpressurePolicy::Buffer);
        mediator.signal_complete();
        mediator.cancel();
        assert_eq!(mediator.state(), MediatorState::Completed);
        assert!(matches!(mediator.try_take(), Ok(Some(Delivery::Complete))));
    }

    #[test]
    fn test_failure_is_delivered_once() {
        let mediator = Mediator::new(BackpressurePolicy::Buffer);
        mediator.offer(1);
        mediator.fail(Error::custom("boom"));

        assert_eq!(mediator.state(), MediatorState::Failed);
        assert!(mediator.is_shut_down());
        assert!(!mediator.is_cancelled());
        match mediator.try_take() {
            Ok(Some(Delivery::Failed(err))) => assert_eq!(err.to_string(), "boom"),
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert!(matches!(mediator.try_take(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_into_stream_ends_on_completion() {
        let mediator = Arc::new(Mediator::new(BackpressurePolicy::Buffer));
        for i in 0..5 {
            mediator.offer(i);
        }
        mediator.signal_complete();

        let items: Vec<u64> = mediator.clone().into_stream().collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(mediator.delivered(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_offer_and_take() {
        let mediator = Arc::new(Mediator::new(BackpressurePolicy::Drop));
        let producer = {
            let mediator = mediator.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..100_000u64 {
                    mediator.offer(i);
                }
                mediator.signal_complete();
            })
        };

        let mut delivered = Vec::new();
        loop {
            match mediator.take().await.unwrap() {
                Delivery::Item(item) => delivered.push(item),
                Delivery::Complete => break,
                other => panic!("unexpected delivery: {:?}", other),
            }
        }
        producer.await.unwrap();

        assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delivered.len() as u64 + mediator.dropped(), 100_000);
    }
}
