//! In-memory document store.
//!
//! Behaves like a single CouchDB database for the purposes of tests:
//! revision trees with conflict branches, an update sequence, `_all_docs`,
//! map/reduce views, change feeds and replication between memory stores.

use crate::feed::{self, ChangeQuery, MemoryFeed, ReplicationPlan};
use crate::revisions::{new_rev, parse_rev, strip_metadata, DocTree, Revision};
use crate::rows::{reduce_rows, sort_rows, Grouping, RowSelection, ViewReduce, ViewRow};
use async_trait::async_trait;
use couchbridge_core::{
    events, DocPredicate, Document, DocumentStore, FeedEmitter, FeedRequest, MapFn, Options,
    RawFeed, Reducer, StoreError, StoreResult, SyncRequest, ViewFunction, CONFLICTS_FIELD,
    DELETED_FIELD, ID_FIELD, REVISIONS_FIELD, REV_FIELD,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};
use uuid::Uuid;

/// Error returned by every call on a destroyed store.
pub fn destroyed_error() -> StoreError {
    StoreError::new(None, "database_destroyed", "database is destroyed")
}

/// JSON form of a store error, as carried by feed `error` / `denied` events.
pub fn error_payload(err: &StoreError) -> Value {
    json!({
        "status": err.status,
        "name": err.name,
        "message": err.message,
        "reason": err.reason,
    })
}

#[derive(Clone)]
struct RegisteredView {
    map: MapFn,
    reduce: Option<ViewReduce>,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, DocTree>,
    update_seq: u64,
    destroyed: bool,
    read_only: bool,
    views: HashMap<String, RegisteredView>,
    filters: HashMap<String, DocPredicate>,
}

impl State {
    fn check_open(&self) -> StoreResult<()> {
        if self.destroyed {
            return Err(destroyed_error());
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StoreError::forbidden("database is read-only"));
        }
        Ok(())
    }

    fn bump(&mut self, id: &str) -> u64 {
        self.update_seq += 1;
        let seq = self.update_seq;
        if let Some(tree) = self.docs.get_mut(id) {
            tree.seq = seq;
        }
        seq
    }

    fn live_count(&self) -> usize {
        self.docs.values().filter(|t| !t.is_deleted()).count()
    }

    /// Regular edit: the new revision extends `rev`, which must be a leaf.
    fn update(
        &mut self,
        id: &str,
        rev: Option<String>,
        body: Document,
        deleted: bool,
    ) -> StoreResult<String> {
        let parent = match (self.docs.get(id), rev) {
            (None, None) => None,
            (None, Some(_)) => return Err(StoreError::conflict("Document update conflict")),
            (Some(tree), Some(rev)) if tree.is_leaf(&rev) => tree.get(&rev).cloned(),
            (Some(_), Some(_)) => return Err(StoreError::conflict("Document update conflict")),
            (Some(tree), None) if tree.is_deleted() => tree.winner().cloned(),
            (Some(_), None) => return Err(StoreError::conflict("Document update conflict")),
        };
        let generation = parent.as_ref().map_or(0, |p| p.generation) + 1;
        let rev = new_rev(generation);
        self.docs.entry(id.to_string()).or_default().insert(Revision {
            rev: rev.clone(),
            generation,
            parent: parent.map(|p| p.rev),
            body,
            deleted,
        });
        Ok(rev)
    }

    /// `new_edits: false`: stores `rev` as given, with the ancestry from
    /// `_revisions` when present.
    fn force(
        &mut self,
        id: &str,
        rev: Option<String>,
        revisions: Option<&Value>,
        body: Document,
        deleted: bool,
    ) -> StoreResult<String> {
        let rev = rev.ok_or_else(|| StoreError::bad_request("new_edits=false requires _rev"))?;
        let (generation, hash) =
            parse_rev(&rev).ok_or_else(|| StoreError::bad_request(format!("invalid rev {rev}")))?;

        let mut chain: Vec<(u64, String)> = vec![(generation, rev.clone())];
        if let Some(revisions) = revisions {
            let ids = revisions
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| StoreError::bad_request("_revisions.ids must be an array"))?;
            if ids.first().and_then(Value::as_str) != Some(hash) {
                return Err(StoreError::bad_request("_revisions does not match _rev"));
            }
            for (i, ancestor) in ids.iter().enumerate().skip(1) {
                let ancestor = ancestor
                    .as_str()
                    .ok_or_else(|| StoreError::bad_request("_revisions.ids must be strings"))?;
                let Some(older) = generation.checked_sub(i as u64).filter(|g| *g > 0) else {
                    break;
                };
                chain.push((older, format!("{older}-{ancestor}")));
            }
        }

        let tree = self.docs.entry(id.to_string()).or_default();
        for i in (0..chain.len()).rev() {
            let (generation, token) = &chain[i];
            let target = i == 0;
            tree.insert(Revision {
                rev: token.clone(),
                generation: *generation,
                parent: chain.get(i + 1).map(|(_, p)| p.clone()),
                body: if target { body.clone() } else { Document::new() },
                deleted: target && deleted,
            });
        }
        Ok(rev)
    }
}

/// Filter applied to change feeds and replication.
#[derive(Clone, Default)]
pub(crate) struct DocFilter {
    doc_ids: Option<HashSet<String>>,
    predicates: Vec<DocPredicate>,
    view: Option<MapFn>,
}

impl DocFilter {
    fn accepts(&self, id: &str, doc: &Document) -> bool {
        if let Some(ids) = &self.doc_ids {
            if !ids.contains(id) {
                return false;
            }
        }
        if let Some(view) = &self.view {
            if view(doc).is_empty() {
                return false;
            }
        }
        self.predicates.iter().all(|p| p(doc))
    }
}

pub(crate) struct Shared {
    name: String,
    state: Mutex<State>,
    seq_tx: watch::Sender<u64>,
    lifecycle: Option<Arc<FeedEmitter>>,
}

impl Shared {
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.seq_tx.subscribe()
    }

    pub(crate) fn update_seq(&self) -> u64 {
        self.state.lock().update_seq
    }

    fn notify(&self, seq: u64) {
        self.seq_tx.send_replace(seq);
    }

    /// Builds the filter described by `request`.
    pub(crate) fn resolve_filter(&self, request: &FeedRequest) -> StoreResult<DocFilter> {
        let state = self.state.lock();
        state.check_open()?;
        let mut filter = DocFilter::default();

        if let Some(ids) = request.options.get("doc_ids") {
            let ids = ids
                .as_array()
                .ok_or_else(|| StoreError::bad_request("doc_ids must be an array"))?;
            filter.doc_ids = Some(
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            );
        }

        match request.options.get("filter").and_then(Value::as_str) {
            Some("_view") => {
                let name = request
                    .options
                    .get("view")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::bad_request("_view filter requires a view"))?;
                let view = state.views.get(name).ok_or_else(|| {
                    StoreError::not_found(format!("missing view {name}")).with_reason("missing")
                })?;
                filter.view = Some(Arc::clone(&view.map));
            }
            Some(name) => {
                let predicate = state.filters.get(name).ok_or_else(|| {
                    StoreError::not_found(format!("missing filter {name}")).with_reason("missing")
                })?;
                filter.predicates.push(Arc::clone(predicate));
            }
            None => {}
        }
        if let Some(predicate) = &request.predicate {
            filter.predicates.push(Arc::clone(predicate));
        }
        Ok(filter)
    }

    /// Change rows after `since`, in sequence order, with the update
    /// sequence they were read at.
    pub(crate) fn changes_since(
        &self,
        since: u64,
        query: &ChangeQuery,
    ) -> StoreResult<(Vec<(u64, Value)>, u64)> {
        let (snapshot, current) = {
            let state = self.state.lock();
            state.check_open()?;
            let snapshot: Vec<(u64, String, Revision, Vec<String>)> = state
                .docs
                .iter()
                .filter(|(_, tree)| tree.seq > since)
                .filter_map(|(id, tree)| {
                    let winner = tree.winner()?.clone();
                    Some((tree.seq, id.clone(), winner, tree.conflicts()))
                })
                .collect();
            (snapshot, state.update_seq)
        };

        let mut rows: Vec<(u64, Value)> = snapshot
            .into_iter()
            .filter_map(|(seq, id, winner, conflicts)| {
                let mut doc = winner.render(&id);
                if !query.filter.accepts(&id, &doc) {
                    return None;
                }
                let mut row = json!({
                    "id": id,
                    "seq": seq,
                    "changes": [{"rev": winner.rev}],
                });
                if let Value::Object(map) = &mut row {
                    if winner.deleted {
                        map.insert("deleted".into(), Value::Bool(true));
                    }
                    if query.include_docs {
                        if query.conflicts && !conflicts.is_empty() {
                            doc.insert(CONFLICTS_FIELD.into(), json!(conflicts));
                        }
                        map.insert("doc".into(), Value::Object(doc));
                    }
                }
                Some((seq, row))
            })
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok((rows, current))
    }

    /// Revision trees of the documents changed after `since` that pass
    /// `filter`, in sequence order.
    pub(crate) fn revisions_since(
        &self,
        since: u64,
        filter: &DocFilter,
    ) -> StoreResult<(Vec<(String, DocTree)>, u64)> {
        let (mut changed, current) = {
            let state = self.state.lock();
            state.check_open()?;
            let changed: Vec<(String, DocTree)> = state
                .docs
                .iter()
                .filter(|(_, tree)| tree.seq > since)
                .map(|(id, tree)| (id.clone(), tree.clone()))
                .collect();
            (changed, state.update_seq)
        };
        changed.retain(|(id, tree)| {
            tree.winner()
                .is_some_and(|w| filter.accepts(id, &w.render(id)))
        });
        changed.sort_by_key(|(_, tree)| tree.seq);
        Ok((changed, current))
    }

    /// Revisions in `source` this store does not have yet.
    pub(crate) fn missing_revisions(
        &self,
        id: &str,
        source: &DocTree,
    ) -> StoreResult<Vec<Revision>> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(source.missing_from(state.docs.get(id)))
    }

    /// Stores replicated revisions.
    pub(crate) fn insert_revisions(&self, id: &str, revisions: Vec<Revision>) -> StoreResult<()> {
        let seq = {
            let mut state = self.state.lock();
            state.check_writable()?;
            let tree = state.docs.entry(id.to_string()).or_default();
            let mut inserted = false;
            for revision in revisions {
                inserted |= tree.insert(revision);
            }
            if !inserted {
                return Ok(());
            }
            state.bump(id)
        };
        self.notify(seq);
        Ok(())
    }

    fn write(&self, doc: Document, options: &Options) -> StoreResult<Value> {
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StoreError::new(Some(412), "missing_id", "_id is required for puts"))?;
        let new_edits = options
            .get("new_edits")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let rev = doc
            .get(REV_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        let deleted = doc
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let revisions = doc.get(REVISIONS_FIELD).cloned();
        let body = strip_metadata(doc);

        let (rev, seq) = {
            let mut state = self.state.lock();
            state.check_writable()?;
            let rev = if new_edits {
                state.update(&id, rev, body, deleted)?
            } else {
                state.force(&id, rev, revisions.as_ref(), body, deleted)?
            };
            (rev, state.bump(&id))
        };
        trace!(db = %self.name, id = %id, rev = %rev, seq, "stored revision");
        self.notify(seq);
        Ok(json!({"ok": true, "id": id, "rev": rev}))
    }

    fn get(&self, id: &str, options: &Options) -> StoreResult<Value> {
        let state = self.state.lock();
        state.check_open()?;
        let missing = || StoreError::not_found("missing").with_reason("missing");
        let tree = state.docs.get(id).ok_or_else(missing)?;

        let requested = options.get("rev").and_then(Value::as_str);
        let revision = match requested {
            Some(rev) => tree.get(rev).ok_or_else(missing)?,
            None => {
                let winner = tree.winner().ok_or_else(missing)?;
                if winner.deleted {
                    return Err(StoreError::not_found("deleted").with_reason("deleted"));
                }
                winner
            }
        };

        let mut doc = revision.render(id);
        let wants = |name: &str| options.get(name).and_then(Value::as_bool).unwrap_or(false);
        if wants("conflicts") && requested.is_none() {
            let conflicts = tree.conflicts();
            if !conflicts.is_empty() {
                doc.insert(CONFLICTS_FIELD.into(), json!(conflicts));
            }
        }
        if wants("revs") {
            let ids: Vec<&str> = tree
                .history(&revision.rev)
                .iter()
                .filter_map(|r| parse_rev(&r.rev).map(|(_, hash)| hash))
                .collect();
            doc.insert(
                REVISIONS_FIELD.into(),
                json!({"start": revision.generation, "ids": ids}),
            );
        }
        Ok(Value::Object(doc))
    }

    fn all_docs(&self, options: &Options) -> StoreResult<Value> {
        let selection = RowSelection::from_options(options);
        let state = self.state.lock();
        state.check_open()?;

        let render = |id: &str, tree: &DocTree| -> Option<Value> {
            let winner = tree.winner()?;
            let mut row = Document::new();
            row.insert("id".into(), Value::from(id));
            row.insert("key".into(), Value::from(id));
            row.insert(
                "value".into(),
                if winner.deleted {
                    json!({"rev": winner.rev, "deleted": true})
                } else {
                    json!({"rev": winner.rev})
                },
            );
            if selection.include_docs {
                let doc = if winner.deleted {
                    Value::Null
                } else {
                    let mut doc = winner.render(id);
                    let conflicts = tree.conflicts();
                    if selection.conflicts && !conflicts.is_empty() {
                        doc.insert(CONFLICTS_FIELD.into(), json!(conflicts));
                    }
                    Value::Object(doc)
                };
                row.insert("doc".into(), doc);
            }
            Some(Value::Object(row))
        };

        let (offset, rows) = match &selection.keys {
            Some(keys) => {
                let rows = keys
                    .iter()
                    .map(|key| {
                        key.as_str()
                            .and_then(|id| state.docs.get(id).and_then(|t| render(id, t)))
                            .unwrap_or_else(|| json!({"key": key, "error": "not_found"}))
                    })
                    .collect();
                (0, rows)
            }
            None => {
                let live: Vec<(Value, &String, &DocTree)> = state
                    .docs
                    .iter()
                    .filter(|(_, tree)| !tree.is_deleted())
                    .map(|(id, tree)| (Value::from(id.as_str()), id, tree))
                    .collect();
                let (offset, selected) = selection.select(live, |(key, _, _)| key);
                let rows = selected
                    .into_iter()
                    .filter_map(|(_, id, tree)| render(id, tree))
                    .collect();
                (offset, rows)
            }
        };
        let rows = selection.page(rows);

        Ok(json!({
            "total_rows": state.live_count(),
            "offset": offset + selection.skip,
            "rows": rows,
        }))
    }

    fn query(&self, fun: &ViewFunction, options: &Options) -> StoreResult<Value> {
        let selection = RowSelection::from_options(options);
        let (map, own_reduce, docs) = {
            let state = self.state.lock();
            state.check_open()?;
            let (map, reduce) = match fun {
                ViewFunction::Named(name) => {
                    let view = state.views.get(name).ok_or_else(|| {
                        StoreError::not_found(format!("missing view {name}"))
                            .with_reason("missing_named_view")
                    })?;
                    (Arc::clone(&view.map), view.reduce.clone())
                }
                ViewFunction::Map(map) => (Arc::clone(map), None),
                ViewFunction::MapReduce { map, reduce } => {
                    (Arc::clone(map), Some(ViewReduce::Custom(Arc::clone(reduce))))
                }
            };
            let docs: Vec<(String, Document)> = state
                .docs
                .iter()
                .filter_map(|(id, tree)| {
                    let winner = tree.winner().filter(|w| !w.deleted)?;
                    Some((id.clone(), winner.render(id)))
                })
                .collect();
            (map, reduce, docs)
        };

        let reduce = match options.get("reduce") {
            None | Some(Value::Bool(true)) => own_reduce,
            Some(Value::Bool(false)) => None,
            Some(Value::String(name)) => Some(ViewReduce::Builtin(
                Reducer::from_name(name).ok_or_else(|| {
                    StoreError::bad_request(format!("unknown builtin reducer {name}"))
                })?,
            )),
            Some(other) => {
                return Err(StoreError::bad_request(format!("invalid reduce option {other}")))
            }
        };
        if reduce.is_some() && selection.include_docs {
            return Err(StoreError::new(
                Some(400),
                "query_parse_error",
                "include_docs is invalid for reduce",
            ));
        }

        let mut rows: Vec<ViewRow> = docs
            .iter()
            .flat_map(|(id, doc)| {
                map(doc).into_iter().map(move |(key, value)| ViewRow {
                    key,
                    id: id.clone(),
                    value,
                    doc: selection.include_docs.then(|| doc.clone()),
                })
            })
            .collect();
        sort_rows(&mut rows);
        let total_rows = rows.len();

        let (offset, rows) = match &selection.keys {
            Some(keys) => {
                let picked = keys
                    .iter()
                    .flat_map(|key| {
                        rows.iter()
                            .filter(|r| crate::collate::collate(&r.key, key).is_eq())
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .collect();
                (0, picked)
            }
            None => selection.select(rows, |r| &r.key),
        };
        let rows = match &reduce {
            Some(reduce) => reduce_rows(&rows, reduce, Grouping::from_options(options))?,
            None => rows,
        };
        let rows: Vec<Value> = selection.page(rows).iter().map(ViewRow::to_value).collect();

        Ok(json!({
            "total_rows": total_rows,
            "offset": offset + selection.skip,
            "rows": rows,
        }))
    }

    fn destroy(&self) -> StoreResult<Value> {
        {
            let mut state = self.state.lock();
            state.check_open()?;
            state.destroyed = true;
            state.docs.clear();
        }
        self.seq_tx.send_modify(|_| {});
        debug!(db = %self.name, "memory store destroyed");
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.emit(events::DESTROYED, &Value::from(self.name.as_str()));
        }
        Ok(json!({"ok": true}))
    }
}

/// An in-memory [`DocumentStore`].
///
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    pub(crate) fn with_lifecycle(name: impl Into<String>, lifecycle: Arc<FeedEmitter>) -> Self {
        Self::build(name.into(), Some(lifecycle))
    }

    fn build(name: String, lifecycle: Option<Arc<FeedEmitter>>) -> Self {
        let (seq_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(State::default()),
                seq_tx,
                lifecycle,
            }),
        }
    }

    /// Current update sequence.
    pub fn update_seq(&self) -> u64 {
        self.shared.update_seq()
    }

    /// Number of documents whose winning revision is not a deletion.
    pub fn doc_count(&self) -> usize {
        self.shared.state.lock().live_count()
    }

    /// Returns true once the store was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.shared.state.lock().destroyed
    }

    /// Makes every later write fail with a 403.
    pub fn set_read_only(&self, read_only: bool) {
        self.shared.state.lock().read_only = read_only;
    }

    /// Winning revision of `id`, deleted or not.
    pub fn winning_rev(&self, id: &str) -> Option<String> {
        let state = self.shared.state.lock();
        state.docs.get(id)?.winner().map(|w| w.rev.clone())
    }

    /// Conflicting revisions of `id`, best first.
    pub fn conflicts(&self, id: &str) -> Vec<String> {
        let state = self.shared.state.lock();
        state.docs.get(id).map(DocTree::conflicts).unwrap_or_default()
    }

    /// Registers a named view, optionally with a built-in reducer.
    pub fn define_view<F>(&self, name: impl Into<String>, map: F, reduce: Option<Reducer>)
    where
        F: Fn(&Document) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        self.shared.state.lock().views.insert(
            name.into(),
            RegisteredView {
                map: Arc::new(map),
                reduce: reduce.map(ViewReduce::Builtin),
            },
        );
    }

    /// Registers a named change filter.
    pub fn define_filter<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.shared
            .state
            .lock()
            .filters
            .insert(name.into(), Arc::new(predicate));
    }

    fn target(target: &Arc<dyn DocumentStore>) -> StoreResult<Arc<Shared>> {
        target
            .as_any()
            .downcast_ref::<MemoryStore>()
            .map(|store| Arc::clone(&store.shared))
            .ok_or_else(|| StoreError::bad_request("memory stores only replicate to memory stores"))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.shared.name)
            .field("update_seq", &self.update_seq())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn info(&self) -> StoreResult<Value> {
        let state = self.shared.state.lock();
        state.check_open()?;
        Ok(json!({
            "db_name": self.shared.name,
            "doc_count": state.live_count(),
            "update_seq": state.update_seq,
        }))
    }

    async fn destroy(&self) -> StoreResult<Value> {
        self.shared.destroy()
    }

    async fn get(&self, id: &str, options: Options) -> StoreResult<Value> {
        self.shared.get(id, &options)
    }

    async fn put(&self, doc: Document, options: Options) -> StoreResult<Value> {
        self.shared.write(doc, &options)
    }

    async fn post(&self, mut doc: Document, options: Options) -> StoreResult<Value> {
        doc.insert(
            ID_FIELD.into(),
            Value::from(Uuid::new_v4().simple().to_string()),
        );
        self.shared.write(doc, &options)
    }

    async fn all_docs(&self, options: Options) -> StoreResult<Value> {
        self.shared.all_docs(&options)
    }

    async fn query(&self, fun: &ViewFunction, options: Options) -> StoreResult<Value> {
        self.shared.query(fun, &options)
    }

    fn changes(&self, request: FeedRequest) -> StoreResult<Arc<dyn RawFeed>> {
        let query = ChangeQuery::parse(&self.shared, &request)?;
        debug!(db = %self.shared.name, live = query.live, "opening memory change feed");
        Ok(MemoryFeed::new(feed::changes_job(Arc::clone(&self.shared), query)))
    }

    fn replicate_to(
        &self,
        target: Arc<dyn DocumentStore>,
        request: FeedRequest,
    ) -> StoreResult<Arc<dyn RawFeed>> {
        let target = Self::target(&target)?;
        let plan = ReplicationPlan::parse(&self.shared, &request)?;
        debug!(source = %self.shared.name, target = %target.name, "opening memory replication");
        Ok(MemoryFeed::new(feed::replication_job(
            Arc::clone(&self.shared),
            target,
            plan,
        )))
    }

    fn sync(
        &self,
        target: Arc<dyn DocumentStore>,
        request: SyncRequest,
    ) -> StoreResult<Arc<dyn RawFeed>> {
        let remote = Self::target(&target)?;
        let push = ReplicationPlan::parse(&self.shared, &request.push)?;
        let pull = ReplicationPlan::parse(&remote, &request.pull)?;
        debug!(local = %self.shared.name, remote = %remote.name, "opening memory sync");
        Ok(MemoryFeed::new(feed::sync_job(
            Arc::clone(&self.shared),
            remote,
            push,
            pull,
        )))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn rev_of(payload: &Value) -> String {
        payload["rev"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn stale_rev_conflicts() {
        let store = MemoryStore::new("t");
        let first = store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap();
        let rev = rev_of(&first);
        store
            .put(doc(json!({"_id": "a", "_rev": rev, "n": 1})), Options::new())
            .await
            .unwrap();
        let err = store
            .put(doc(json!({"_id": "a", "_rev": rev, "n": 2})), Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(409));
        let blind = store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap_err();
        assert_eq!(blind.name, "conflict");
    }

    #[tokio::test]
    async fn deleted_doc_can_be_recreated_blind() {
        let store = MemoryStore::new("t");
        let first = store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap();
        store
            .put(
                doc(json!({"_id": "a", "_rev": rev_of(&first), "_deleted": true})),
                Options::new(),
            )
            .await
            .unwrap();
        let err = store.get("a", Options::new()).await.unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("deleted"));
        let again = store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap();
        assert!(rev_of(&again).starts_with("3-"));
    }

    #[tokio::test]
    async fn forced_revisions_build_branches() {
        let store = MemoryStore::new("t");
        let mut options = Options::new();
        options.insert("new_edits".into(), json!(false));
        for (rev, ids) in [("2-x", json!(["x", "a"])), ("2-y", json!(["y", "a"]))] {
            store
                .put(
                    doc(json!({
                        "_id": "d",
                        "_rev": rev,
                        "_revisions": {"start": 2, "ids": ids},
                        "v": rev
                    })),
                    options.clone(),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.winning_rev("d").as_deref(), Some("2-y"));
        assert_eq!(store.conflicts("d"), vec!["2-x".to_string()]);

        let mut get = Options::new();
        get.insert("revs".into(), json!(true));
        let fetched = store.get("d", get).await.unwrap();
        assert_eq!(fetched["_revisions"], json!({"start": 2, "ids": ["y", "a"]}));
    }

    #[tokio::test]
    async fn destroyed_store_refuses_calls() {
        let store = MemoryStore::new("t");
        store.destroy().await.unwrap();
        let err = store.info().await.unwrap_err();
        assert_eq!(err.name, "database_destroyed");
        assert!(store.destroy().await.is_err());
    }

    #[tokio::test]
    async fn read_only_store_refuses_writes() {
        let store = MemoryStore::new("t");
        store.set_read_only(true);
        let err = store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap_err();
        assert_eq!(err.status, Some(403));
    }

    #[tokio::test]
    async fn all_docs_keys_report_missing_rows() {
        let store = MemoryStore::new("t");
        store.put(doc(json!({"_id": "a"})), Options::new()).await.unwrap();
        let mut options = Options::new();
        options.insert("keys".into(), json!(["a", "nope"]));
        let result = store.all_docs(options).await.unwrap();
        assert_eq!(result["rows"][0]["id"], "a");
        assert_eq!(result["rows"][1]["error"], "not_found");
    }

    #[tokio::test]
    async fn reduce_with_include_docs_is_rejected() {
        let store = MemoryStore::new("t");
        let mut options = Options::new();
        options.insert("reduce".into(), json!("_count"));
        options.insert("include_docs".into(), json!(true));
        let fun = ViewFunction::map(|_: &Document| vec![(Value::Null, Value::Null)]);
        let err = store.query(&fun, options).await.unwrap_err();
        assert_eq!(err.name, "query_parse_error");
    }

    #[tokio::test]
    async fn unknown_filter_is_refused_up_front() {
        let store = MemoryStore::new("t");
        let mut options = Options::new();
        options.insert("filter".into(), json!("app/missing"));
        let err = store.changes(FeedRequest::new(options)).err().unwrap();
        assert_eq!(err.status, Some(404));
    }
}
