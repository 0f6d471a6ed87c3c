//! Running an async handler over a subscription's events.

use crate::handle::{FeedControl, FeedHandle, Subscription};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Cancels the feed when the dispatcher task goes away, including by panic
/// or abort. After a normal end the feed already ended and this is a no-op.
struct CancelOnDrop(Arc<FeedControl>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Runs `handler` for every event of `subscription` on a tokio task.
///
/// Events are handled one at a time, in arrival order; the next event is not
/// taken until the previous handler future resolved. The task ends once the
/// feed ended and its queue is drained.
///
/// The returned handle controls the feed. Dropping it cancels the feed, and
/// so does the task ending early because `handler` panicked or the task was
/// aborted.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn spawn_dispatcher<E, F, Fut>(
    subscription: Subscription<E>,
    mut handler: F,
) -> (FeedHandle, JoinHandle<()>)
where
    E: Send + 'static,
    F: FnMut(E) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (handle, mut events) = subscription.into_parts();
    let guard = CancelOnDrop(handle.control());
    let task = tokio::spawn(async move {
        let _guard = guard;
        let mut handled = 0u64;
        while let Some(event) = events.recv().await {
            handler(event).await;
            handled += 1;
        }
        trace!(handled, "dispatcher finished");
    });
    (handle, task)
}
