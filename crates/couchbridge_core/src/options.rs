//! Option normalization for request/response operations.
//!
//! Each request struct maps to the minimal option object the store accepts.
//! A field that was never set is omitted rather than written as a default,
//! so the store's own default applies. Normalization is pure and builds a
//! fresh map on every call.

use crate::types::{
    Document, DocumentRef, Options, DELETED_FIELD, ID_FIELD, REV_FIELD,
};
use crate::view::ViewFunction;
use serde_json::{Map, Value};

/// A view or `_all_docs` key.
///
/// The store compares composite keys component by component.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// A single JSON value.
    Scalar(Value),
    /// An array key.
    Composite(Vec<Value>),
}

impl Key {
    /// Builds a composite key.
    pub fn composite<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Key::Composite(parts.into_iter().map(Into::into).collect())
    }

    /// The `{}` sentinel that collates after every other JSON value.
    pub fn high() -> Value {
        Value::Object(Map::new())
    }

    /// Returns true for array keys.
    pub fn is_composite(&self) -> bool {
        matches!(self, Key::Composite(_))
    }

    /// Converts to the JSON value sent to the store.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Scalar(v) => v.clone(),
            Key::Composite(parts) => Value::Array(parts.clone()),
        }
    }

    fn unwrap_single(&self) -> Key {
        match self {
            Key::Composite(parts) if parts.len() == 1 => Key::Scalar(parts[0].clone()),
            other => other.clone(),
        }
    }

    fn promote(&self) -> Key {
        match self {
            Key::Scalar(v) => Key::Composite(vec![v.clone()]),
            other => other.clone(),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Scalar(Value::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Scalar(Value::from(s))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Scalar(Value::from(n))
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(parts) => Key::Composite(parts),
            other => Key::Scalar(other),
        }
    }
}

/// Normalizes a `startkey`/`endkey` pair.
///
/// A lone single-element composite bound is unwrapped to its scalar. When
/// both bounds are present and only one is composite, the scalar one is
/// promoted to a single-element composite so both compare alike.
pub fn normalize_range(start: Option<&Key>, end: Option<&Key>) -> (Option<Key>, Option<Key>) {
    match (start, end) {
        (None, None) => (None, None),
        (Some(start), None) => (Some(start.unwrap_single()), None),
        (None, Some(end)) => (None, Some(end.unwrap_single())),
        (Some(start), Some(end)) => match (start.is_composite(), end.is_composite()) {
            (true, false) => (Some(start.clone()), Some(end.promote())),
            (false, true) => (Some(start.promote()), Some(end.clone())),
            _ => (Some(start.clone()), Some(end.clone())),
        },
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

/// Options for fetching a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Fetch a specific revision.
    pub rev: Option<String>,
    /// Include revision history.
    pub revs: Option<bool>,
    /// Include conflicting leaf revisions.
    pub conflicts: Option<bool>,
    /// Include attachment bodies.
    pub attachments: Option<bool>,
    /// Return attachments as binary.
    pub binary: Option<bool>,
}

impl GetOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches a specific revision.
    #[must_use]
    pub fn rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Includes revision history.
    #[must_use]
    pub fn revs(mut self, value: bool) -> Self {
        self.revs = Some(value);
        self
    }

    /// Includes conflicts.
    #[must_use]
    pub fn conflicts(mut self, value: bool) -> Self {
        self.conflicts = Some(value);
        self
    }

    /// Includes attachments.
    #[must_use]
    pub fn attachments(mut self, value: bool) -> Self {
        self.attachments = Some(value);
        self
    }

    /// Returns attachments as binary.
    #[must_use]
    pub fn binary(mut self, value: bool) -> Self {
        self.binary = Some(value);
        self
    }

    /// Builds the store's option object.
    pub fn to_options(&self) -> Options {
        let mut options = Map::new();
        if let Some(rev) = &self.rev {
            options.insert("rev".into(), Value::from(rev.as_str()));
        }
        set_bool(&mut options, "revs", self.revs);
        set_bool(&mut options, "conflicts", self.conflicts);
        set_bool(&mut options, "attachments", self.attachments);
        set_bool(&mut options, "binary", self.binary);
        options
    }
}

/// Row selection for `all_docs`, also used by `query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllDocsOptions {
    /// Include the document body in each row.
    pub include_docs: Option<bool>,
    /// Include conflicts in included documents.
    pub conflicts: Option<bool>,
    /// Include attachment bodies.
    pub attachments: Option<bool>,
    /// Reverse row order.
    pub descending: Option<bool>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Maximum rows returned.
    pub limit: Option<u64>,
    /// Lower range bound.
    pub startkey: Option<Key>,
    /// Upper range bound.
    pub endkey: Option<Key>,
    /// Include rows equal to `endkey`.
    pub inclusive_end: Option<bool>,
    /// Only rows with this key.
    pub key: Option<Key>,
    /// Only rows with one of these keys, in this order.
    pub keys: Option<Vec<Key>>,
}

impl AllDocsOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes documents.
    #[must_use]
    pub fn include_docs(mut self, value: bool) -> Self {
        self.include_docs = Some(value);
        self
    }

    /// Includes conflicts.
    #[must_use]
    pub fn conflicts(mut self, value: bool) -> Self {
        self.conflicts = Some(value);
        self
    }

    /// Includes attachments.
    #[must_use]
    pub fn attachments(mut self, value: bool) -> Self {
        self.attachments = Some(value);
        self
    }

    /// Reverses row order.
    #[must_use]
    pub fn descending(mut self, value: bool) -> Self {
        self.descending = Some(value);
        self
    }

    /// Skips rows.
    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Limits rows.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn startkey(mut self, key: impl Into<Key>) -> Self {
        self.startkey = Some(key.into());
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn endkey(mut self, key: impl Into<Key>) -> Self {
        self.endkey = Some(key.into());
        self
    }

    /// Includes rows equal to the upper bound.
    #[must_use]
    pub fn inclusive_end(mut self, value: bool) -> Self {
        self.inclusive_end = Some(value);
        self
    }

    /// Selects a single key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Selects a list of keys.
    #[must_use]
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Builds the store's option object.
    pub fn to_options(&self) -> Options {
        let mut options = Map::new();
        self.write_into(&mut options);
        options
    }

    fn write_into(&self, options: &mut Options) {
        set_bool(options, "include_docs", self.include_docs);
        set_bool(options, "conflicts", self.conflicts);
        set_bool(options, "attachments", self.attachments);
        set_bool(options, "descending", self.descending);
        set_u64(options, "skip", self.skip);
        set_u64(options, "limit", self.limit);

        let (start, end) = normalize_range(self.startkey.as_ref(), self.endkey.as_ref());
        if let Some(start) = start {
            options.insert("startkey".into(), start.to_value());
        }
        if let Some(end) = end {
            options.insert("endkey".into(), end.to_value());
        }

        set_bool(options, "inclusive_end", self.inclusive_end);
        if let Some(key) = &self.key {
            options.insert("key".into(), key.to_value());
        }
        if let Some(keys) = &self.keys {
            options.insert(
                "keys".into(),
                Value::Array(keys.iter().map(Key::to_value).collect()),
            );
        }
    }
}

/// Freshness required from a view index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stale {
    /// Bring the index up to date before answering.
    #[default]
    Fresh,
    /// Answer from the index as it is.
    Ok,
    /// Answer from the index as it is, then refresh it in the background.
    UpdateAfter,
}

impl Stale {
    fn as_option(self) -> Option<&'static str> {
        match self {
            Stale::Fresh => None,
            Stale::Ok => Some("ok"),
            Stale::UpdateAfter => Some("update_after"),
        }
    }
}

/// Built-in reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Numeric sum of values.
    Sum,
    /// Number of rows.
    Count,
    /// `{sum, count, min, max, sumsqr}` of values.
    Stats,
}

impl Reducer {
    /// Name the store knows the reducer by.
    pub fn as_str(self) -> &'static str {
        match self {
            Reducer::Sum => "_sum",
            Reducer::Count => "_count",
            Reducer::Stats => "_stats",
        }
    }

    /// Parses a reducer name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "_sum" => Some(Reducer::Sum),
            "_count" => Some(Reducer::Count),
            "_stats" => Some(Reducer::Stats),
            _ => None,
        }
    }
}

/// Options for a view query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// The view to run.
    pub fun: ViewFunction,
    /// Row selection.
    pub rows: AllDocsOptions,
    /// Index freshness.
    pub stale: Stale,
    /// Built-in reducer.
    pub reduce: Option<Reducer>,
    /// Group rows by this many key components. Implies grouping.
    pub group_level: Option<u32>,
}

impl QueryOptions {
    /// Queries `fun` with default options.
    pub fn new(fun: ViewFunction) -> Self {
        Self {
            fun,
            rows: AllDocsOptions::default(),
            stale: Stale::default(),
            reduce: None,
            group_level: None,
        }
    }

    /// Sets row selection.
    #[must_use]
    pub fn rows(mut self, rows: AllDocsOptions) -> Self {
        self.rows = rows;
        self
    }

    /// Sets index freshness.
    #[must_use]
    pub fn stale(mut self, stale: Stale) -> Self {
        self.stale = stale;
        self
    }

    /// Sets the reducer.
    #[must_use]
    pub fn reduce(mut self, reducer: Reducer) -> Self {
        self.reduce = Some(reducer);
        self
    }

    /// Enables grouping at `level`.
    #[must_use]
    pub fn group_level(mut self, level: u32) -> Self {
        self.group_level = Some(level);
        self
    }

    /// Builds the store's option object. The view itself is passed separately.
    pub fn to_options(&self) -> Options {
        let mut options = Map::new();
        self.rows.write_into(&mut options);
        if let Some(stale) = self.stale.as_option() {
            options.insert("stale".into(), Value::from(stale));
        }
        if let Some(reducer) = self.reduce {
            options.insert("reduce".into(), Value::from(reducer.as_str()));
        }
        if let Some(level) = self.group_level {
            options.insert("group".into(), Value::Bool(true));
            options.insert("group_level".into(), Value::from(level));
        }
        options
    }
}

/// Payload for `put`: `rev`, when given, replaces `_rev`.
pub fn put_payload(mut doc: Document, rev: Option<&str>) -> Document {
    if let Some(rev) = rev {
        doc.insert(REV_FIELD.into(), Value::from(rev));
    }
    doc
}

/// Payload that deletes `target` when written through `put`.
pub fn deletion_payload(target: &DocumentRef) -> Document {
    let mut doc = Map::new();
    doc.insert(ID_FIELD.into(), Value::from(target.id.as_str()));
    if let Some(rev) = &target.rev {
        doc.insert(REV_FIELD.into(), Value::from(rev.as_str()));
    }
    doc.insert(DELETED_FIELD.into(), Value::Bool(true));
    doc
}
