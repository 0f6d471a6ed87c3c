//! Opens feeds on a store and bridges their raw events into subscriptions.

use crate::error::FeedResult;
use crate::event::{ChangeEvent, DatabaseEvent, FeedEvent, ReplicationEvent};
use crate::handle::{Delivery, FeedControl, FeedHandle, Subscription};
use crate::options::{ChangeFeedOptions, ReplicationOptions, SyncOptions};
use couchbridge_core::{Database, RawFeed, StoreConnector};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Attaches one listener per event kind of `E` to `raw`, then starts it.
///
/// A listener only enqueues while the feed is active. The terminal event
/// flips the state to completed before it is queued, so nothing follows it.
/// Once the receiver is gone the feed is cancelled.
fn subscribe<E: FeedEvent>(raw: Arc<dyn RawFeed>, kind: &'static str) -> Subscription<E> {
    let (tx, rx) = mpsc::unbounded_channel::<E>();
    let control = Arc::new(FeedControl::new(Arc::clone(&raw), kind));

    let ids = E::EVENTS
        .iter()
        .map(|&event| {
            let tx = tx.clone();
            let control = Arc::downgrade(&control);
            raw.on(
                event,
                Arc::new(move |payload: &Value| {
                    let Some(control) = control.upgrade() else {
                        return;
                    };
                    if !control.is_active() {
                        return;
                    }
                    let item = match E::translate(event, payload) {
                        Ok(item) => item,
                        Err(err) => {
                            warn!(
                                feed = control.kind(),
                                event,
                                error = %err,
                                "dropping malformed feed event"
                            );
                            return;
                        }
                    };
                    match control.deliver(item.is_terminal(), || tx.send(item).is_ok()) {
                        Delivery::Completed => control.finish(),
                        Delivery::Closed => {
                            debug!(feed = control.kind(), "event receiver dropped");
                            control.cancel();
                        }
                        Delivery::Queued | Delivery::Refused => {}
                    }
                }),
            )
        })
        .collect();
    control.set_listeners(ids);

    raw.start();
    Subscription::new(FeedHandle::new(control), rx)
}

/// Follows the changes of `db`.
///
/// A one-shot feed reports every change since `options.since` and then
/// completes. A live feed keeps running until cancelled.
pub fn changes(
    db: &Database,
    options: ChangeFeedOptions,
) -> FeedResult<Subscription<ChangeEvent>> {
    db.ensure_open()?;
    let raw = db.store().changes(options.to_request())?;
    debug!(db = %db.name(), live = options.live, since = ?options.since, "change feed opened");
    Ok(subscribe(raw, "changes"))
}

/// Replicates `source` into `target`.
pub fn replicate(
    source: &Database,
    target: &Database,
    options: ReplicationOptions,
) -> FeedResult<Subscription<ReplicationEvent>> {
    source.ensure_open()?;
    target.ensure_open()?;
    let raw = source
        .store()
        .replicate_to(Arc::clone(target.store()), options.to_request())?;
    debug!(
        source = %source.name(),
        target = %target.name(),
        live = options.live.is_live(),
        "replication opened"
    );
    Ok(subscribe(raw, "replication"))
}

/// Replicates in both directions between `local` and `remote`.
///
/// Changes, denials and errors carry the direction they happened in.
pub fn sync(
    local: &Database,
    remote: &Database,
    options: SyncOptions,
) -> FeedResult<Subscription<ReplicationEvent>> {
    local.ensure_open()?;
    remote.ensure_open()?;
    let raw = local
        .store()
        .sync(Arc::clone(remote.store()), options.to_request())?;
    debug!(local = %local.name(), remote = %remote.name(), "sync opened");
    Ok(subscribe(raw, "sync"))
}

/// Reports databases created and destroyed through `connector`.
///
/// Never completes on its own; cancelling only detaches this subscription.
pub fn listen(connector: &dyn StoreConnector) -> Subscription<DatabaseEvent> {
    debug!("listening for database lifecycle events");
    subscribe(connector.lifecycle(), "lifecycle")
}
