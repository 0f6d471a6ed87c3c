//! Named-event emitter for [`RawFeed`](crate::store::RawFeed) implementations.
//!
//! Listeners are stored as `Arc`s so emission works on a snapshot:
//! - a listener removed during emission is still called in that round,
//! - a listener added during emission is first called on the next emit.
//!
//! The lock is never held while a listener runs, so listeners may call
//! `on`/`off` themselves.

use crate::store::{Listener, ListenerId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Typed-by-name event emitter.
pub struct FeedEmitter {
    listeners: Mutex<Vec<(ListenerId, String, Listener)>>,
    next_id: AtomicU64,
}

impl FeedEmitter {
    /// Creates an emitter without listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `listener` for `event`.
    pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, event.to_string(), listener));
        id
    }

    /// Removes a listener. Safe to call repeatedly.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _, _)| *lid != id);
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Calls every listener registered for `event`.
    pub fn emit(&self, event: &str, payload: &Value) {
        let snapshot: Vec<Listener> = {
            let guard = self.listeners.lock();
            guard
                .iter()
                .filter(|(_, name, _)| name == event)
                .map(|(_, _, listener)| Listener::clone(listener))
                .collect()
        };
        for listener in snapshot {
            listener(payload);
        }
    }

    /// Number of registered listeners across all events.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for FeedEmitter {
    fn default() -> Self {
        Self::new()
    }
}
