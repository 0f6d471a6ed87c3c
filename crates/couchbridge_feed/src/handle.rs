//! Feed lifecycle and the caller-facing subscription.

use crate::error::{FeedError, FeedResult};
use couchbridge_core::{ListenerId, RawFeed};
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// Lifecycle state of a feed.
///
/// ```text
/// Active --cancel--> Cancelled
///    \---complete--> Completed
/// ```
///
/// Both end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Events are being delivered.
    Active,
    /// Stopped by the caller.
    Cancelled,
    /// Stopped by the feed.
    Completed,
}

/// Outcome of [`FeedControl::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Queued; the feed stays active.
    Queued,
    /// The terminal event was queued and the feed is now completed.
    Completed,
    /// The feed already ended; nothing was queued.
    Refused,
    /// Nobody is left to receive events.
    Closed,
}

/// Shared between the handle and the listeners attached to the raw feed.
pub(crate) struct FeedControl {
    state: AtomicU8,
    /// Held while checking the state and queueing, and while cancelling.
    gate: Mutex<()>,
    raw: Arc<dyn RawFeed>,
    listeners: Mutex<Vec<ListenerId>>,
    kind: &'static str,
}

impl FeedControl {
    pub(crate) fn new(raw: Arc<dyn RawFeed>, kind: &'static str) -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            gate: Mutex::new(()),
            raw,
            listeners: Mutex::new(Vec::new()),
            kind,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn set_listeners(&self, ids: Vec<ListenerId>) {
        *self.listeners.lock() = ids;
    }

    pub(crate) fn state(&self) -> FeedState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => FeedState::Active,
            CANCELLED => FeedState::Cancelled,
            _ => FeedState::Completed,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn detach(&self) {
        let ids = std::mem::take(&mut *self.listeners.lock());
        for id in ids {
            self.raw.off(id);
        }
    }

    /// Queues one event through `send` while the feed is active.
    ///
    /// The state check and `send` run under the gate, so an event emitted
    /// concurrently with the terminal one is either queued before it or not
    /// at all. A terminal event moves the feed to `Completed` first. `send`
    /// returns false when the receiver is gone.
    pub(crate) fn deliver(&self, terminal: bool, send: impl FnOnce() -> bool) -> Delivery {
        let _gate = self.gate.lock();
        if terminal {
            if !self.transition(COMPLETED) {
                return Delivery::Refused;
            }
            send();
            return Delivery::Completed;
        }
        if !self.is_active() {
            return Delivery::Refused;
        }
        if send() {
            Delivery::Queued
        } else {
            Delivery::Closed
        }
    }

    /// Detaches after a completion was queued.
    pub(crate) fn finish(&self) {
        self.detach();
        debug!(feed = self.kind, "feed completed");
    }

    /// Moves to `Cancelled` and stops the raw feed. No-op once ended.
    ///
    /// Must not be called while [`deliver`](Self::deliver) holds the gate.
    pub(crate) fn cancel(&self) {
        let cancelled = {
            let _gate = self.gate.lock();
            self.transition(CANCELLED)
        };
        if !cancelled {
            return;
        }
        self.detach();
        self.raw.cancel();
        debug!(feed = self.kind, "feed cancelled");
    }
}

/// Caller-side control of a running feed.
///
/// Dropping the handle cancels the feed.
pub struct FeedHandle {
    control: Arc<FeedControl>,
}

impl FeedHandle {
    pub(crate) fn new(control: Arc<FeedControl>) -> Self {
        Self { control }
    }

    pub(crate) fn control(&self) -> Arc<FeedControl> {
        Arc::clone(&self.control)
    }

    /// Stops the feed. Idempotent, and a no-op after completion.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Current state.
    pub fn state(&self) -> FeedState {
        self.control.state()
    }

    /// Returns true while events are being delivered.
    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.control.cancel();
    }
}

impl fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHandle")
            .field("kind", &self.control.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// A running feed: its handle plus the queue of translated events.
///
/// Events arrive in the order the store emitted them. After the feed ends
/// the queue drains and then yields `None`.
pub struct Subscription<E> {
    handle: FeedHandle,
    events: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    pub(crate) fn new(handle: FeedHandle, events: mpsc::UnboundedReceiver<E>) -> Self {
        Self { handle, events }
    }

    /// The feed's handle.
    pub fn handle(&self) -> &FeedHandle {
        &self.handle
    }

    /// Stops the feed. Events already queued can still be received.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Waits for the next event. `None` once the feed ended and the queue
    /// is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Takes the next queued event without waiting.
    pub fn try_recv(&mut self) -> FeedResult<Option<E>> {
        match self.events.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FeedError::ChannelClosed),
        }
    }

    /// Splits into the handle and the raw event receiver.
    pub fn into_parts(self) -> (FeedHandle, mpsc::UnboundedReceiver<E>) {
        (self.handle, self.events)
    }
}

impl<E> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchbridge_core::{FeedEmitter, Listener};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingFeed {
        emitter: FeedEmitter,
        cancels: AtomicUsize,
    }

    impl RawFeed for CountingFeed {
        fn on(&self, event: &str, listener: Listener) -> ListenerId {
            self.emitter.on(event, listener)
        }

        fn off(&self, id: ListenerId) {
            self.emitter.off(id);
        }

        fn start(&self) {}

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn control(feed: &Arc<CountingFeed>) -> Arc<FeedControl> {
        let raw: Arc<dyn RawFeed> = Arc::clone(feed) as Arc<dyn RawFeed>;
        let control = Arc::new(FeedControl::new(Arc::clone(&raw), "test"));
        let id = raw.on("change", Arc::new(|_: &Value| {}));
        control.set_listeners(vec![id]);
        control
    }

    #[test]
    fn cancel_twice_is_a_no_op() {
        let feed = Arc::new(CountingFeed::default());
        let handle = FeedHandle::new(control(&feed));
        handle.cancel();
        handle.cancel();
        assert_eq!(handle.state(), FeedState::Cancelled);
        assert_eq!(feed.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(feed.emitter.listener_count(), 0);
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let feed = Arc::new(CountingFeed::default());
        let control = control(&feed);
        let handle = FeedHandle::new(Arc::clone(&control));
        assert_eq!(control.deliver(true, || true), Delivery::Completed);
        control.finish();
        handle.cancel();
        assert_eq!(handle.state(), FeedState::Completed);
        assert_eq!(feed.cancels.load(Ordering::SeqCst), 0);
        assert_eq!(control.deliver(true, || true), Delivery::Refused);
    }

    #[test]
    fn lost_receiver_is_reported() {
        let feed = Arc::new(CountingFeed::default());
        let control = control(&feed);
        assert_eq!(control.deliver(false, || false), Delivery::Closed);
        assert!(control.is_active());
    }

    #[test]
    fn nothing_is_queued_after_completion_across_threads() {
        let feed = Arc::new(CountingFeed::default());
        let control = control(&feed);
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        std::thread::scope(|scope| {
            for worker in 0..4u32 {
                let control = &control;
                let tx = tx.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        control.deliver(false, || tx.send(worker).is_ok());
                    }
                });
            }
            let control = &control;
            let tx = tx.clone();
            scope.spawn(move || {
                control.deliver(true, || tx.send(u32::MAX).is_ok());
            });
        });
        drop(tx);

        let mut queued = Vec::new();
        while let Ok(item) = rx.try_recv() {
            queued.push(item);
        }
        assert_eq!(queued.last(), Some(&u32::MAX));
        assert_eq!(queued.iter().filter(|&&item| item == u32::MAX).count(), 1);
    }

    #[test]
    fn drop_cancels() {
        let feed = Arc::new(CountingFeed::default());
        let control = control(&feed);
        drop(FeedHandle::new(Arc::clone(&control)));
        assert_eq!(control.state(), FeedState::Cancelled);
        assert_eq!(feed.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_queue_reports_channel_closed() {
        let feed = Arc::new(CountingFeed::default());
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut subscription = Subscription::new(FeedHandle::new(control(&feed)), rx);
        tx.send(1).unwrap();
        drop(tx);
        assert_eq!(subscription.try_recv().unwrap(), Some(1));
        assert!(matches!(subscription.try_recv(), Err(FeedError::ChannelClosed)));
    }
}
