//! Boundary with the document store.
//!
//! These traits describe the store as this layer sees it: request/response
//! calls returning raw JSON, and long-lived feeds exposed as event emitters.
//! Implementations decide how those map onto a real database (an embedded
//! engine, an HTTP client, an in-memory double for tests).

use crate::error::StoreResult;
use crate::types::{Document, Options};
use crate::view::ViewFunction;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Identifier returned by [`RawFeed::on`].
pub type ListenerId = u64;

/// Callback receiving a raw event payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Client-side filter applied by the store to each changed document.
pub type DocPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Event names emitted by raw feeds.
pub mod events {
    /// A change row or replication batch.
    pub const CHANGE: &str = "change";
    /// The feed finished on its own.
    pub const COMPLETE: &str = "complete";
    /// The feed reported an error.
    pub const ERROR: &str = "error";
    /// Replication caught up or is waiting to retry.
    pub const PAUSED: &str = "paused";
    /// Replication resumed.
    pub const ACTIVE: &str = "active";
    /// A document write was refused by the target.
    pub const DENIED: &str = "denied";
    /// A database was created.
    pub const CREATED: &str = "created";
    /// A database was destroyed.
    pub const DESTROYED: &str = "destroyed";
}

/// A long-lived store process that reports through named events.
///
/// Listeners attached before [`RawFeed::start`] observe every event.
pub trait RawFeed: Send + Sync {
    /// Attaches `listener` to `event`.
    fn on(&self, event: &str, listener: Listener) -> ListenerId;

    /// Detaches a listener. Unknown ids are ignored.
    fn off(&self, id: ListenerId);

    /// Begins producing events.
    fn start(&self);

    /// Stops producing events. Events already in flight may still arrive.
    fn cancel(&self);
}

/// Normalized options for one change feed or replication direction.
#[derive(Clone, Default)]
pub struct FeedRequest {
    /// Option object.
    pub options: Options,
    /// Inline filter, which cannot travel inside the option object.
    pub predicate: Option<DocPredicate>,
}

impl FeedRequest {
    /// A request without inline filter.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            predicate: None,
        }
    }
}

impl fmt::Debug for FeedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedRequest")
            .field("options", &self.options)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Normalized options for a bidirectional sync.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Local to remote.
    pub push: FeedRequest,
    /// Remote to local.
    pub pull: FeedRequest,
}

impl SyncRequest {
    /// The combined `{push, pull}` option object.
    pub fn options(&self) -> Options {
        let mut options = Map::new();
        options.insert("push".into(), Value::Object(self.push.options.clone()));
        options.insert("pull".into(), Value::Object(self.pull.options.clone()));
        options
    }
}

/// One opened store instance.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Store name.
    fn name(&self) -> &str;

    /// Store metadata (`db_name`, `doc_count`, `update_seq`).
    async fn info(&self) -> StoreResult<Value>;

    /// Deletes the store. Later calls fail.
    async fn destroy(&self) -> StoreResult<Value>;

    /// Fetches a document.
    async fn get(&self, id: &str, options: Options) -> StoreResult<Value>;

    /// Writes a document carrying its own `_id`.
    async fn put(&self, doc: Document, options: Options) -> StoreResult<Value>;

    /// Writes a document under a store-generated id.
    async fn post(&self, doc: Document, options: Options) -> StoreResult<Value>;

    /// Lists documents by id.
    async fn all_docs(&self, options: Options) -> StoreResult<Value>;

    /// Runs a view.
    async fn query(&self, fun: &ViewFunction, options: Options) -> StoreResult<Value>;

    /// Opens a change feed. Events: `change`, `complete`, `error`.
    fn changes(&self, request: FeedRequest) -> StoreResult<Arc<dyn RawFeed>>;

    /// Opens a one-way replication into `target`.
    ///
    /// Events: `change`, `paused`, `active`, `denied`, `complete`, `error`.
    fn replicate_to(
        &self,
        target: Arc<dyn DocumentStore>,
        request: FeedRequest,
    ) -> StoreResult<Arc<dyn RawFeed>>;

    /// Opens a bidirectional sync with `target`, with the replication events
    /// of both directions merged.
    fn sync(
        &self,
        target: Arc<dyn DocumentStore>,
        request: SyncRequest,
    ) -> StoreResult<Arc<dyn RawFeed>>;

    /// Access to the concrete type, for stores that replicate natively.
    fn as_any(&self) -> &dyn Any;
}

/// Opens stores by name.
pub trait StoreConnector: Send + Sync {
    /// Opens (or creates) the store `name`.
    fn open(&self, name: &str, options: Options) -> StoreResult<Arc<dyn DocumentStore>>;

    /// Store-wide `created` / `destroyed` notifications. The payload is the
    /// database name.
    fn lifecycle(&self) -> Arc<dyn RawFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_options_are_directional() {
        let mut push = Map::new();
        push.insert("live".into(), json!(true));
        let request = SyncRequest {
            push: FeedRequest::new(push),
            pull: FeedRequest::default(),
        };
        assert_eq!(
            Value::Object(request.options()),
            json!({"push": {"live": true}, "pull": {}})
        );
    }

    #[test]
    fn feed_request_debug_hides_predicate() {
        let request = FeedRequest {
            options: Map::new(),
            predicate: Some(Arc::new(|_: &Document| true)),
        };
        assert!(format!("{request:?}").contains("<fn>"));
    }
}
