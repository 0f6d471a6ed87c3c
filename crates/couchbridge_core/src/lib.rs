//! # Couchbridge Core
//!
//! Typed request layer over CouchDB-compatible document stores.
//!
//! This crate provides:
//! - Option builders that normalize into the store's option objects
//! - Translation of raw store payloads into typed results
//! - The [`Database`] handle performing one store call per operation
//! - The [`DocumentStore`] / [`StoreConnector`] boundary that stores implement
//!
//! ## Key Invariants
//!
//! - An option left unset is omitted from the option object
//! - Every store failure surfaces as a [`StoreError`], never as a panic
//! - Operations are never retried by this layer
//! - A destroyed handle refuses every later call

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod emitter;
mod error;
mod options;
mod store;
pub mod translate;
mod types;
mod view;

pub use config::{Adapter, AjaxOptions, DbOptions};
pub use database::Database;
pub use emitter::FeedEmitter;
pub use error::{CoreError, CoreResult, ErrorKind, ResetStage, StoreError, StoreResult};
pub use options::{
    deletion_payload, normalize_range, put_payload, AllDocsOptions, GetOptions, Key,
    QueryOptions, Reducer, Stale,
};
pub use store::{
    events, DocPredicate, DocumentStore, FeedRequest, Listener, ListenerId, RawFeed,
    StoreConnector, SyncRequest,
};
pub use types::{
    ChangeRecord, DatabaseInfo, Document, DocumentRef, Options, PutResponse, QueryResult,
    RevisionInfo, Sequence, CONFLICTS_FIELD, DELETED_FIELD, ID_FIELD, REVISIONS_FIELD, REV_FIELD,
};
pub use view::{MapFn, ReduceFn, ViewFunction};
