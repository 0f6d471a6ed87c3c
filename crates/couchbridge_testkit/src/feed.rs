//! Change feeds, replication and sync between memory stores.
//!
//! Each feed is a [`MemoryFeed`] holding a job. `start` runs the job's
//! synchronous part (resolving `since: "now"` and subscribing to the store's
//! update sequence) on the caller's thread, then spawns the rest on the
//! current tokio runtime.

use crate::memory::{error_payload, DocFilter, Shared};
use couchbridge_core::{
    events, ErrorKind, FeedEmitter, FeedRequest, Listener, ListenerId, Options, RawFeed,
    StoreError, StoreResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{trace, warn};

type Sink = Arc<dyn Fn(&str, Value) + Send + Sync>;
type Task = Pin<Box<dyn Future<Output = ()> + Send>>;
pub(crate) type Job = Box<dyn FnOnce(FeedContext) -> Task + Send>;

/// Where a running job reports, and how it learns it was cancelled.
#[derive(Clone)]
pub(crate) struct FeedContext {
    sink: Sink,
    cancel_rx: watch::Receiver<bool>,
}

impl FeedContext {
    fn emit(&self, event: &str, payload: Value) {
        if !self.is_cancelled() {
            (self.sink)(event, payload);
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves on cancellation, or when the feed itself is gone.
    async fn cancelled(&mut self) {
        let _ = self.cancel_rx.wait_for(|cancelled| *cancelled).await;
    }

    fn with_sink(&self, sink: Sink) -> Self {
        Self {
            sink,
            cancel_rx: self.cancel_rx.clone(),
        }
    }

    /// Waits for the next store update. Returns false when the feed should stop.
    async fn next_update(&mut self, seq_rx: &mut watch::Receiver<u64>) -> bool {
        let changed = tokio::select! {
            _ = self.cancelled() => false,
            changed = seq_rx.changed() => changed.is_ok(),
        };
        changed && !self.is_cancelled()
    }
}

/// A [`RawFeed`] backed by a job on the tokio runtime.
pub(crate) struct MemoryFeed {
    emitter: Arc<FeedEmitter>,
    cancel_tx: watch::Sender<bool>,
    job: Mutex<Option<Job>>,
}

impl MemoryFeed {
    pub(crate) fn new(job: Job) -> Arc<dyn RawFeed> {
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            emitter: Arc::new(FeedEmitter::new()),
            cancel_tx,
            job: Mutex::new(Some(job)),
        })
    }
}

impl RawFeed for MemoryFeed {
    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.emitter.on(event, listener)
    }

    fn off(&self, id: ListenerId) {
        self.emitter.off(id);
    }

    fn start(&self) {
        let Some(job) = self.job.lock().take() else {
            return;
        };
        let emitter = Arc::clone(&self.emitter);
        let ctx = FeedContext {
            sink: Arc::new(move |event: &str, payload: Value| emitter.emit(event, &payload)),
            cancel_rx: self.cancel_tx.subscribe(),
        };
        let task = job(ctx);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => warn!("memory feed started outside a tokio runtime; no events will follow"),
        }
    }

    fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.job.lock().take();
    }
}

/// Where a feed starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Since {
    Seq(u64),
    Now,
}

impl Since {
    fn parse(options: &Options) -> StoreResult<Self> {
        match options.get("since") {
            None => Ok(Since::Seq(0)),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Since::Seq)
                .ok_or_else(|| StoreError::bad_request(format!("invalid since {n}"))),
            Some(Value::String(s)) if s == "now" => Ok(Since::Now),
            Some(Value::String(s)) => s
                .parse()
                .map(Since::Seq)
                .map_err(|_| StoreError::bad_request(format!("invalid since {s}"))),
            Some(other) => Err(StoreError::bad_request(format!("invalid since {other}"))),
        }
    }

    fn resolve(self, store: &Shared) -> u64 {
        match self {
            Since::Seq(seq) => seq,
            Since::Now => store.update_seq(),
        }
    }
}

fn flag(options: &Options, name: &str) -> bool {
    options.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// A parsed change-feed request.
pub(crate) struct ChangeQuery {
    pub live: bool,
    since: Since,
    pub filter: DocFilter,
    pub include_docs: bool,
    pub conflicts: bool,
    descending: bool,
    limit: Option<usize>,
}

impl ChangeQuery {
    pub(crate) fn parse(store: &Shared, request: &FeedRequest) -> StoreResult<Self> {
        let options = &request.options;
        Ok(Self {
            live: flag(options, "live"),
            since: Since::parse(options)?,
            filter: store.resolve_filter(request)?,
            include_docs: flag(options, "include_docs"),
            conflicts: flag(options, "conflicts"),
            descending: flag(options, "descending"),
            limit: options
                .get("limit")
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok()),
        })
    }
}

pub(crate) fn changes_job(store: Arc<Shared>, query: ChangeQuery) -> Job {
    Box::new(move |ctx| {
        let seq_rx = store.subscribe();
        let since = query.since.resolve(&store);
        Box::pin(run_changes(store, query, since, seq_rx, ctx))
    })
}

async fn run_changes(
    store: Arc<Shared>,
    query: ChangeQuery,
    since: u64,
    mut seq_rx: watch::Receiver<u64>,
    mut ctx: FeedContext,
) {
    let mut last = since;
    let mut sent = 0usize;
    let mut results = Vec::new();
    loop {
        let (mut rows, current) = match store.changes_since(last, &query) {
            Ok(found) => found,
            Err(err) => {
                ctx.emit(events::ERROR, error_payload(&err));
                return;
            }
        };
        if query.descending && !query.live {
            rows.reverse();
        }
        for (seq, row) in rows {
            if ctx.is_cancelled() {
                return;
            }
            trace!(seq, "memory change");
            ctx.emit(events::CHANGE, row.clone());
            last = last.max(seq);
            sent += 1;
            if !query.live {
                results.push(row);
            }
            if query.limit.is_some_and(|limit| sent >= limit) {
                ctx.emit(events::COMPLETE, json!({"results": results, "last_seq": last}));
                return;
            }
        }
        last = last.max(current);
        if !query.live {
            ctx.emit(events::COMPLETE, json!({"results": results, "last_seq": last}));
            return;
        }
        if !ctx.next_update(&mut seq_rx).await {
            return;
        }
    }
}

/// A parsed one-way replication request.
pub(crate) struct ReplicationPlan {
    live: bool,
    since: Since,
    filter: DocFilter,
}

impl ReplicationPlan {
    pub(crate) fn parse(source: &Shared, request: &FeedRequest) -> StoreResult<Self> {
        Ok(Self {
            live: flag(&request.options, "live"),
            since: Since::parse(&request.options)?,
            filter: source.resolve_filter(request)?,
        })
    }
}

#[derive(Debug, Default)]
struct Progress {
    docs_read: u64,
    docs_written: u64,
    doc_write_failures: u64,
}

impl Progress {
    fn payload(&self, last_seq: u64) -> Value {
        json!({
            "docs_read": self.docs_read,
            "docs_written": self.docs_written,
            "doc_write_failures": self.doc_write_failures,
            "last_seq": last_seq,
        })
    }
}

/// One direction of replication, ready to run.
struct Replication {
    source: Arc<Shared>,
    target: Arc<Shared>,
    live: bool,
    since: u64,
    filter: DocFilter,
    seq_rx: watch::Receiver<u64>,
}

impl Replication {
    fn prepare(source: Arc<Shared>, target: Arc<Shared>, plan: ReplicationPlan) -> Self {
        let seq_rx = source.subscribe();
        let since = plan.since.resolve(&source);
        Self {
            source,
            target,
            live: plan.live,
            since,
            filter: plan.filter,
            seq_rx,
        }
    }

    /// Copies missing revisions. Reports `paused` after the first pass and
    /// after every later pass that wrote something.
    async fn run(mut self, mut ctx: FeedContext) {
        let mut progress = Progress::default();
        let mut first = true;
        loop {
            let (batch, current) = match self.source.revisions_since(self.since, &self.filter) {
                Ok(found) => found,
                Err(err) => {
                    ctx.emit(events::ERROR, error_payload(&err));
                    return;
                }
            };

            let mut docs = Vec::new();
            let mut touched = false;
            for (id, tree) in batch {
                if ctx.is_cancelled() {
                    return;
                }
                let missing = match self.target.missing_revisions(&id, &tree) {
                    Ok(missing) => missing,
                    Err(err) => {
                        ctx.emit(events::ERROR, error_payload(&err));
                        return;
                    }
                };
                if missing.is_empty() {
                    continue;
                }
                if !touched && !first {
                    ctx.emit(events::ACTIVE, json!({}));
                }
                touched = true;
                progress.docs_read += 1;
                match self.target.insert_revisions(&id, missing) {
                    Ok(()) => {
                        progress.docs_written += 1;
                        if let Some(winner) = tree.winner() {
                            docs.push(Value::Object(winner.render(&id)));
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Denied => {
                        progress.doc_write_failures += 1;
                        ctx.emit(
                            events::DENIED,
                            json!({"id": id, "error": error_payload(&err)}),
                        );
                    }
                    Err(err) => {
                        ctx.emit(events::ERROR, error_payload(&err));
                        return;
                    }
                }
            }

            self.since = self.since.max(current);
            if touched {
                let mut payload = progress.payload(self.since);
                if let Value::Object(map) = &mut payload {
                    map.insert("docs".into(), Value::Array(docs));
                }
                ctx.emit(events::CHANGE, payload);
            }
            if first || touched {
                ctx.emit(events::PAUSED, json!({}));
            }
            first = false;

            if !self.live {
                let mut payload = progress.payload(self.since);
                if let Value::Object(map) = &mut payload {
                    map.insert("ok".into(), Value::Bool(true));
                    map.insert("status".into(), Value::from("complete"));
                }
                ctx.emit(events::COMPLETE, payload);
                return;
            }
            if !ctx.next_update(&mut self.seq_rx).await {
                return;
            }
        }
    }
}

pub(crate) fn replication_job(
    source: Arc<Shared>,
    target: Arc<Shared>,
    plan: ReplicationPlan,
) -> Job {
    Box::new(move |ctx| {
        let replication = Replication::prepare(source, target, plan);
        Box::pin(replication.run(ctx))
    })
}

/// Merges the two directions of a sync into one event stream.
struct SyncMerge {
    outer: FeedContext,
    state: Mutex<MergeState>,
}

#[derive(Default)]
struct MergeState {
    paused: [bool; 2],
    complete: [Option<Value>; 2],
}

const DIRECTIONS: [&str; 2] = ["push", "pull"];

impl SyncMerge {
    fn sink(self: &Arc<Self>, side: usize) -> Sink {
        let merge = Arc::clone(self);
        Arc::new(move |event: &str, payload: Value| merge.forward(side, event, payload))
    }

    fn forward(&self, side: usize, event: &str, payload: Value) {
        let outgoing = {
            let mut state = self.state.lock();
            match event {
                events::PAUSED => {
                    state.paused[side] = true;
                    state.paused.iter().all(|p| *p).then(|| json!({}))
                }
                events::ACTIVE => {
                    let was_paused = state.paused.iter().all(|p| *p);
                    state.paused[side] = false;
                    was_paused.then(|| json!({}))
                }
                events::COMPLETE => {
                    state.complete[side] = Some(payload);
                    match &state.complete {
                        [Some(push), Some(pull)] => Some(json!({"push": push, "pull": pull})),
                        _ => None,
                    }
                }
                _ => {
                    let mut payload = payload;
                    if let Value::Object(map) = &mut payload {
                        map.insert("direction".into(), Value::from(DIRECTIONS[side]));
                    }
                    Some(payload)
                }
            }
        };
        if let Some(payload) = outgoing {
            self.outer.emit(event, payload);
        }
    }
}

pub(crate) fn sync_job(
    local: Arc<Shared>,
    remote: Arc<Shared>,
    push: ReplicationPlan,
    pull: ReplicationPlan,
) -> Job {
    Box::new(move |ctx| {
        let push = Replication::prepare(Arc::clone(&local), Arc::clone(&remote), push);
        let pull = Replication::prepare(remote, local, pull);
        let merge = Arc::new(SyncMerge {
            outer: ctx.clone(),
            state: Mutex::new(MergeState::default()),
        });
        let push_ctx = ctx.with_sink(merge.sink(0));
        let pull_ctx = ctx.with_sink(merge.sink(1));
        Box::pin(async move {
            tokio::join!(push.run(push_ctx), pull.run(pull_ctx));
        })
    })
}
