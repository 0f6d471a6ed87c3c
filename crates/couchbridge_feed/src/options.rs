//! Options for change feeds, replication and sync.
//!
//! As with the request options in `couchbridge_core`, unset fields are left
//! out of the option object so the store's defaults apply.

use couchbridge_core::{DocPredicate, Document, FeedRequest, Options, SyncRequest};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where a feed starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Since {
    /// From the first change.
    #[default]
    Beginning,
    /// After the given update sequence.
    Seq(u64),
    /// Only changes made after the feed starts.
    Now,
}

impl Since {
    fn write_into(self, options: &mut Options) {
        match self {
            Since::Beginning => {}
            Since::Seq(seq) => {
                options.insert("since".into(), Value::from(seq));
            }
            Since::Now => {
                options.insert("since".into(), Value::from("now"));
            }
        }
    }
}

/// Restricts which documents a feed reports.
#[derive(Clone)]
pub enum Filter {
    /// A filter function stored in the database, by name.
    Name(String),
    /// A filter evaluated client-side.
    Predicate(DocPredicate),
    /// Documents the named view emits rows for.
    View(String),
    /// Only these document ids.
    DocIds(Vec<String>),
}

impl Filter {
    /// Builds a client-side filter.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(f))
    }

    /// Builds a document id filter.
    pub fn doc_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::DocIds(ids.into_iter().map(Into::into).collect())
    }

    fn write_into(&self, request: &mut FeedRequest) {
        match self {
            Filter::Name(name) => {
                request
                    .options
                    .insert("filter".into(), Value::from(name.as_str()));
            }
            Filter::Predicate(predicate) => request.predicate = Some(Arc::clone(predicate)),
            Filter::View(view) => {
                request.options.insert("filter".into(), Value::from("_view"));
                request.options.insert("view".into(), Value::from(view.as_str()));
            }
            Filter::DocIds(ids) => {
                request.options.insert(
                    "doc_ids".into(),
                    Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect()),
                );
            }
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(<fn>)"),
            Filter::View(view) => f.debug_tuple("View").field(view).finish(),
            Filter::DocIds(ids) => f.debug_tuple("DocIds").field(ids).finish(),
        }
    }
}

fn set_bool(options: &mut Options, name: &str, value: Option<bool>) {
    if let Some(value) = value {
        options.insert(name.into(), Value::Bool(value));
    }
}

fn set_u64(options: &mut Options, name: &str, value: Option<u64>) {
    if let Some(value) = value {
        options.insert(name.into(), Value::from(value));
    }
}

fn set_millis(options: &mut Options, name: &str, value: Option<Duration>) {
    if let Some(value) = value {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        options.insert(name.into(), Value::from(millis));
    }
}

/// Options for a change feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeFeedOptions {
    /// Keep reporting changes after catching up.
    pub live: bool,
    /// Starting point.
    pub since: Since,
    /// Document filter.
    pub filter: Option<Filter>,
    /// Include each changed document.
    pub include_docs: Option<bool>,
    /// Include conflicting revisions in included documents.
    pub conflicts: Option<bool>,
    /// Include attachment data.
    pub attachments: Option<bool>,
    /// Report newest changes first.
    pub descending: Option<bool>,
    /// Server-side request timeout.
    pub timeout: Option<Duration>,
    /// Stop after this many changes.
    pub limit: Option<u64>,
    /// Keep-alive interval for live feeds.
    pub heartbeat: Option<Duration>,
    /// Changes fetched per request.
    pub batch_size: Option<u64>,
    /// Accumulate changes for the `complete` event.
    pub return_docs: Option<bool>,
    /// Parameters passed to a named filter function.
    pub query_params: Option<Map<String, Value>>,
}

impl ChangeFeedOptions {
    /// A one-shot feed from the beginning.
    pub fn new() -> Self {
        Self::default()
    }

    /// A live feed of changes made from now on.
    pub fn live_from_now() -> Self {
        Self::new().live(true).since(Since::Now)
    }

    /// Sets live mode.
    #[must_use]
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Sets the starting point.
    #[must_use]
    pub fn since(mut self, since: Since) -> Self {
        self.since = since;
        self
    }

    /// Sets the document filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Includes changed documents.
    #[must_use]
    pub fn include_docs(mut self, value: bool) -> Self {
        self.include_docs = Some(value);
        self
    }

    /// Includes conflicting revisions.
    #[must_use]
    pub fn conflicts(mut self, value: bool) -> Self {
        self.conflicts = Some(value);
        self
    }

    /// Includes attachment data.
    #[must_use]
    pub fn attachments(mut self, value: bool) -> Self {
        self.attachments = Some(value);
        self
    }

    /// Reports newest changes first.
    #[must_use]
    pub fn descending(mut self, value: bool) -> Self {
        self.descending = Some(value);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stops after `n` changes.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn batch_size(mut self, n: u64) -> Self {
        self.batch_size = Some(n);
        self
    }

    /// Sets whether changes are accumulated for `complete`.
    #[must_use]
    pub fn return_docs(mut self, value: bool) -> Self {
        self.return_docs = Some(value);
        self
    }

    /// Adds a parameter for a named filter function.
    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Builds the store request.
    pub fn to_request(&self) -> FeedRequest {
        let mut request = FeedRequest::default();
        if let Some(filter) = &self.filter {
            filter.write_into(&mut request);
        }
        let options = &mut request.options;
        if self.live {
            options.insert("live".into(), Value::Bool(true));
        }
        self.since.write_into(options);
        set_bool(options, "include_docs", self.include_docs);
        set_bool(options, "conflicts", self.conflicts);
        set_bool(options, "attachments", self.attachments);
        set_bool(options, "descending", self.descending);
        set_millis(options, "timeout", self.timeout);
        set_u64(options, "limit", self.limit);
        set_millis(options, "heartbeat", self.heartbeat);
        set_u64(options, "batch_size", self.batch_size);
        set_bool(options, "return_docs", self.return_docs);
        if let Some(params) = &self.query_params {
            options.insert("query_params".into(), Value::Object(params.clone()));
        }
        request
    }
}

/// How long a replication keeps running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LiveMode {
    /// Replicate what is there, then complete.
    #[default]
    OneShot,
    /// Keep following the source.
    Continuous,
    /// Keep following the source and retry after failures, waiting
    /// `back_off` between attempts when given.
    ///
    /// The request carries `retry: true` and, when set, the delay as whole
    /// milliseconds under the `back_off` key. Stores that support retrying
    /// read it from there; others ignore both.
    ContinuousWithRetry {
        /// Delay between retries.
        back_off: Option<Duration>,
    },
}

impl LiveMode {
    /// Returns true for both continuous modes.
    pub fn is_live(self) -> bool {
        !matches!(self, LiveMode::OneShot)
    }
}

/// Options for one replication direction.
#[derive(Debug, Clone, Default)]
pub struct ReplicationOptions {
    /// One-shot or continuous.
    pub live: LiveMode,
    /// Starting point.
    pub since: Since,
    /// Document filter.
    pub filter: Option<Filter>,
    /// Keep-alive interval.
    pub heartbeat: Option<Duration>,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Documents per batch.
    pub batch_size: Option<u64>,
    /// Batches buffered at once.
    pub batches_limit: Option<u64>,
    /// Parameters passed to a named filter function.
    pub query_params: Option<Map<String, Value>>,
}

impl ReplicationOptions {
    /// One-shot replication from the beginning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the live mode.
    #[must_use]
    pub fn live(mut self, live: LiveMode) -> Self {
        self.live = live;
        self
    }

    /// Sets the starting point.
    #[must_use]
    pub fn since(mut self, since: Since) -> Self {
        self.since = since;
        self
    }

    /// Sets the document filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets documents per batch.
    #[must_use]
    pub fn batch_size(mut self, n: u64) -> Self {
        self.batch_size = Some(n);
        self
    }

    /// Sets batches buffered at once.
    #[must_use]
    pub fn batches_limit(mut self, n: u64) -> Self {
        self.batches_limit = Some(n);
        self
    }

    /// Adds a parameter for a named filter function.
    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Builds the store request. Retry settings are only written for
    /// continuous replication.
    pub fn to_request(&self) -> FeedRequest {
        let mut request = FeedRequest::default();
        if let Some(filter) = &self.filter {
            filter.write_into(&mut request);
        }
        let options = &mut request.options;
        match self.live {
            LiveMode::OneShot => {}
            LiveMode::Continuous => {
                options.insert("live".into(), Value::Bool(true));
            }
            LiveMode::ContinuousWithRetry { back_off } => {
                options.insert("live".into(), Value::Bool(true));
                options.insert("retry".into(), Value::Bool(true));
                set_millis(options, "back_off", back_off);
            }
        }
        self.since.write_into(options);
        set_millis(options, "heartbeat", self.heartbeat);
        set_millis(options, "timeout", self.timeout);
        set_u64(options, "batch_size", self.batch_size);
        set_u64(options, "batches_limit", self.batches_limit);
        if let Some(params) = &self.query_params {
            options.insert("query_params".into(), Value::Object(params.clone()));
        }
        request
    }
}

/// Options for a bidirectional sync.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Local to remote.
    pub push: ReplicationOptions,
    /// Remote to local.
    pub pull: ReplicationOptions,
}

impl SyncOptions {
    /// Sync with separate options per direction.
    pub fn new(push: ReplicationOptions, pull: ReplicationOptions) -> Self {
        Self { push, pull }
    }

    /// Sync with the same options in both directions.
    pub fn both(options: ReplicationOptions) -> Self {
        Self {
            push: options.clone(),
            pull: options,
        }
    }

    /// Builds the store request.
    pub fn to_request(&self) -> SyncRequest {
        SyncRequest {
            push: self.push.to_request(),
            pull: self.pull.to_request(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn default_change_feed_is_empty() {
        let request = ChangeFeedOptions::new().to_request();
        assert!(request.options.is_empty());
        assert!(request.predicate.is_none());
    }

    #[test]
    fn live_from_now() {
        let request = ChangeFeedOptions::live_from_now().to_request();
        assert_eq!(
            Value::Object(request.options),
            json!({"live": true, "since": "now"})
        );
    }

    #[test]
    fn explicit_false_is_written() {
        let request = ChangeFeedOptions::new().include_docs(false).to_request();
        assert_eq!(Value::Object(request.options), json!({"include_docs": false}));
    }

    #[test]
    fn view_filter_names_the_view() {
        let request = ChangeFeedOptions::new()
            .filter(Filter::View("app/by_type".into()))
            .to_request();
        assert_eq!(
            Value::Object(request.options),
            json!({"filter": "_view", "view": "app/by_type"})
        );
    }

    #[test]
    fn doc_ids_never_set_filter() {
        let request = ChangeFeedOptions::new()
            .filter(Filter::doc_ids(["a", "b"]))
            .to_request();
        assert_eq!(Value::Object(request.options), json!({"doc_ids": ["a", "b"]}));
    }

    #[test]
    fn predicate_travels_out_of_band() {
        let request = ChangeFeedOptions::new()
            .filter(Filter::predicate(|doc: &Document| doc.contains_key("type")))
            .to_request();
        assert!(request.options.is_empty());
        assert!(request.predicate.is_some());
    }

    #[test]
    fn durations_are_milliseconds() {
        let request = ChangeFeedOptions::new()
            .heartbeat(Duration::from_secs(10))
            .timeout(Duration::from_millis(2500))
            .to_request();
        assert_eq!(
            Value::Object(request.options),
            json!({"heartbeat": 10000, "timeout": 2500})
        );
    }

    #[test]
    fn retry_only_when_live() {
        let one_shot = ReplicationOptions::new().to_request();
        assert!(one_shot.options.is_empty());

        let retrying = ReplicationOptions::new()
            .live(LiveMode::ContinuousWithRetry {
                back_off: Some(Duration::from_secs(2)),
            })
            .since(Since::Seq(7))
            .to_request();
        assert_eq!(
            Value::Object(retrying.options),
            json!({"live": true, "retry": true, "back_off": 2000, "since": 7})
        );
    }

    #[test]
    fn back_off_is_written_in_milliseconds() {
        let request = ReplicationOptions::new()
            .live(LiveMode::ContinuousWithRetry {
                back_off: Some(Duration::from_micros(1_500_900)),
            })
            .to_request();
        assert_eq!(request.options.get("back_off"), Some(&json!(1500)));
        assert!(!request.options.contains_key("backOff"));

        let request = ReplicationOptions::new()
            .live(LiveMode::ContinuousWithRetry { back_off: None })
            .to_request();
        assert_eq!(request.options.get("retry"), Some(&json!(true)));
        assert!(!request.options.contains_key("back_off"));
    }

    #[test]
    fn sync_keeps_directions_apart() {
        let options = SyncOptions::new(
            ReplicationOptions::new().live(LiveMode::Continuous),
            ReplicationOptions::new().batch_size(50),
        );
        assert_eq!(
            Value::Object(options.to_request().options()),
            json!({"push": {"live": true}, "pull": {"batch_size": 50}})
        );
    }

    proptest! {
        #[test]
        fn since_seq_is_written_verbatim(seq in any::<u64>()) {
            let request = ChangeFeedOptions::new().since(Since::Seq(seq)).to_request();
            prop_assert_eq!(request.options.get("since"), Some(&Value::from(seq)));
        }

        #[test]
        fn one_shot_replication_never_retries(batch in prop::option::of(1u64..1000)) {
            let mut options = ReplicationOptions::new();
            options.batch_size = batch;
            let request = options.to_request();
            prop_assert!(!request.options.contains_key("live"));
            prop_assert!(!request.options.contains_key("retry"));
            prop_assert!(!request.options.contains_key("back_off"));
        }
    }
}
