//! Opens memory stores by name.

use crate::memory::MemoryStore;
use couchbridge_core::{
    events, DocumentStore, FeedEmitter, Listener, ListenerId, Options, RawFeed, StoreConnector,
    StoreError, StoreResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Store-wide `created` / `destroyed` notifications.
///
/// The feed is shared by every subscriber, so `cancel` leaves it running;
/// subscribers detach their own listeners.
struct LifecycleFeed {
    emitter: Arc<FeedEmitter>,
}

impl RawFeed for LifecycleFeed {
    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.emitter.on(event, listener)
    }

    fn off(&self, id: ListenerId) {
        self.emitter.off(id);
    }

    fn start(&self) {}

    fn cancel(&self) {}
}

/// A [`StoreConnector`] whose stores live in memory.
///
/// Opening a name twice returns the same store until it is destroyed.
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, MemoryStore>>,
    lifecycle: Arc<LifecycleFeed>,
}

impl MemoryConnector {
    /// Creates a connector with no stores.
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            lifecycle: Arc::new(LifecycleFeed {
                emitter: Arc::new(FeedEmitter::new()),
            }),
        }
    }

    /// The live store named `name`, if one was opened.
    pub fn store(&self, name: &str) -> Option<MemoryStore> {
        self.stores
            .lock()
            .get(name)
            .filter(|store| !store.is_destroyed())
            .cloned()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConnector for MemoryConnector {
    fn open(&self, name: &str, options: Options) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = {
            let mut stores = self.stores.lock();
            if let Some(store) = stores.get(name).filter(|s| !s.is_destroyed()) {
                return Ok(Arc::new(store.clone()));
            }
            if options.get("skip_setup").and_then(Value::as_bool) == Some(true) {
                return Err(StoreError::not_found(format!("database {name} does not exist"))
                    .with_reason("no_db_file"));
            }
            let store = MemoryStore::with_lifecycle(name, Arc::clone(&self.lifecycle.emitter));
            stores.insert(name.to_string(), store.clone());
            store
        };
        debug!(db = %name, "memory store created");
        self.lifecycle.emitter.emit(events::CREATED, &Value::from(name));
        Ok(Arc::new(store))
    }

    fn lifecycle(&self) -> Arc<dyn RawFeed> {
        Arc::clone(&self.lifecycle) as Arc<dyn RawFeed>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reopening_returns_the_same_store() {
        let connector = MemoryConnector::new();
        let created = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&created);
        connector.lifecycle().on(
            events::CREATED,
            Arc::new(move |_: &Value| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        connector.open("a", Options::new()).unwrap();
        connector.open("a", Options::new()).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(connector.store("a").is_some());
    }

    #[test]
    fn skip_setup_requires_existing_store() {
        let connector = MemoryConnector::new();
        let mut options = Options::new();
        options.insert("skip_setup".into(), json!(true));
        let err = connector.open("missing", options).err().unwrap();
        assert_eq!(err.status, Some(404));
    }
}
