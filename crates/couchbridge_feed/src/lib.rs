//! # Couchbridge Feed
//!
//! Cancellable change feeds, replication and sync for couchbridge.
//!
//! This crate provides:
//! - Feed option builders ([`ChangeFeedOptions`], [`ReplicationOptions`], [`SyncOptions`])
//! - Typed feed events translated from the store's raw payloads
//! - [`Subscription`]s with a [`FeedHandle`] to cancel them
//! - An async dispatcher running a handler per event
//!
//! ## Lifecycle
//!
//! Every feed moves from active to exactly one of two end states:
//! 1. Cancelled, when the caller cancels or drops the handle
//! 2. Completed, when the store reports the feed is done
//!
//! ## Key Invariants
//!
//! - Events are delivered in the order the store emitted them
//! - Nothing is delivered after cancellation
//! - Nothing is delivered after the completion event
//! - Cancelling twice, or after completion, does nothing
//! - Store errors are delivered as events and do not end the feed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coordinator;
mod dispatch;
mod error;
mod event;
mod handle;
mod options;

pub use coordinator::{changes, listen, replicate, sync};
pub use dispatch::spawn_dispatcher;
pub use error::{FeedError, FeedResult};
pub use event::{
    ChangeEvent, DatabaseEvent, Direction, FeedEvent, ReplicationEvent, ReplicationProgress,
};
pub use handle::{FeedHandle, FeedState, Subscription};
pub use options::{ChangeFeedOptions, Filter, LiveMode, ReplicationOptions, Since, SyncOptions};
