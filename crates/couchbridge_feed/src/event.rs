//! Typed feed events and their translation from raw store payloads.

use couchbridge_core::translate::{self, sequence};
use couchbridge_core::{events, ChangeRecord, CoreError, CoreResult, Sequence, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event type a subscription can carry.
pub trait FeedEvent: Send + Sized + 'static {
    /// Raw event names to listen for.
    const EVENTS: &'static [&'static str];

    /// Translates one raw event.
    fn translate(event: &str, payload: &Value) -> CoreResult<Self>;

    /// Returns true for the event that ends the feed.
    fn is_terminal(&self) -> bool;
}

fn unknown(event: &str) -> CoreError {
    CoreError::unexpected_response(format!("unexpected feed event {event}"))
}

/// Event of a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document changed.
    Changed(ChangeRecord),
    /// The feed caught up and stopped.
    Completed {
        /// Last sequence reported.
        last_seq: Option<Sequence>,
    },
    /// The store reported an error.
    Error(StoreError),
}

impl FeedEvent for ChangeEvent {
    const EVENTS: &'static [&'static str] = &[events::CHANGE, events::COMPLETE, events::ERROR];

    fn translate(event: &str, payload: &Value) -> CoreResult<Self> {
        match event {
            events::CHANGE => translate::change(payload).map(ChangeEvent::Changed),
            events::COMPLETE => Ok(ChangeEvent::Completed {
                last_seq: payload.get("last_seq").and_then(sequence),
            }),
            events::ERROR => Ok(ChangeEvent::Error(translate::store_error(payload))),
            other => Err(unknown(other)),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ChangeEvent::Completed { .. })
    }
}

/// Replication direction within a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

impl Direction {
    fn from_payload(payload: &Value) -> Option<Self> {
        match payload.get("direction").and_then(Value::as_str)? {
            "push" => Some(Direction::Push),
            "pull" => Some(Direction::Pull),
            _ => None,
        }
    }
}

/// Replication counters as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationProgress {
    /// Documents read from the source.
    #[serde(default)]
    pub docs_read: u64,
    /// Documents written to the target.
    #[serde(default)]
    pub docs_written: u64,
    /// Documents the target refused.
    #[serde(default)]
    pub doc_write_failures: u64,
    /// Last source sequence processed.
    #[serde(default)]
    pub last_seq: Option<Sequence>,
}

impl ReplicationProgress {
    /// Reads counters from a replication payload. A sync payload with
    /// `push` and `pull` parts yields the sum of both, without `last_seq`.
    pub fn from_payload(payload: &Value) -> CoreResult<Self> {
        if let (Some(push), Some(pull)) = (payload.get("push"), payload.get("pull")) {
            let push = Self::from_payload(push)?;
            let pull = Self::from_payload(pull)?;
            return Ok(Self {
                docs_read: push.docs_read + pull.docs_read,
                docs_written: push.docs_written + pull.docs_written,
                doc_write_failures: push.doc_write_failures + pull.doc_write_failures,
                last_seq: None,
            });
        }
        Self::deserialize(payload)
            .map_err(|e| CoreError::unexpected_response(format!("replication progress: {e}")))
    }
}

/// Lifecycle event of a replication or sync.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A batch was replicated.
    Changed {
        /// Direction, for sync.
        direction: Option<Direction>,
        /// Counters so far.
        progress: ReplicationProgress,
    },
    /// Caught up, or waiting to retry after the given error.
    Paused(Option<StoreError>),
    /// Resumed after a pause.
    Active,
    /// The target refused a document.
    Denied {
        /// Direction, for sync.
        direction: Option<Direction>,
        /// The refusal.
        error: StoreError,
    },
    /// Finished.
    Completed(ReplicationProgress),
    /// The replication failed.
    Error {
        /// Direction, for sync.
        direction: Option<Direction>,
        /// The failure.
        error: StoreError,
    },
}

fn nested_error(payload: &Value) -> StoreError {
    match payload.get("error") {
        Some(error @ Value::Object(_)) => translate::store_error(error),
        _ => translate::store_error(payload),
    }
}

fn carries_error(payload: &Value) -> bool {
    ["status", "name", "error", "message"]
        .iter()
        .any(|field| payload.get(field).is_some_and(|v| !v.is_null()))
}

impl FeedEvent for ReplicationEvent {
    const EVENTS: &'static [&'static str] = &[
        events::CHANGE,
        events::PAUSED,
        events::ACTIVE,
        events::DENIED,
        events::COMPLETE,
        events::ERROR,
    ];

    fn translate(event: &str, payload: &Value) -> CoreResult<Self> {
        let direction = Direction::from_payload(payload);
        match event {
            events::CHANGE => Ok(ReplicationEvent::Changed {
                direction,
                progress: ReplicationProgress::from_payload(payload)?,
            }),
            events::PAUSED => Ok(ReplicationEvent::Paused(
                carries_error(payload).then(|| nested_error(payload)),
            )),
            events::ACTIVE => Ok(ReplicationEvent::Active),
            events::DENIED => Ok(ReplicationEvent::Denied {
                direction,
                error: nested_error(payload),
            }),
            events::COMPLETE => Ok(ReplicationEvent::Completed(
                ReplicationProgress::from_payload(payload)?,
            )),
            events::ERROR => Ok(ReplicationEvent::Error {
                direction,
                error: nested_error(payload),
            }),
            other => Err(unknown(other)),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ReplicationEvent::Completed(_))
    }
}

/// Store-wide lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseEvent {
    /// A database was created.
    Created(String),
    /// A database was destroyed.
    Destroyed(String),
}

impl FeedEvent for DatabaseEvent {
    const EVENTS: &'static [&'static str] = &[events::CREATED, events::DESTROYED];

    fn translate(event: &str, payload: &Value) -> CoreResult<Self> {
        let name = payload
            .as_str()
            .or_else(|| payload.get("db_name").and_then(Value::as_str))
            .ok_or_else(|| CoreError::unexpected_response("lifecycle event without a name"))?
            .to_string();
        match event {
            events::CREATED => Ok(DatabaseEvent::Created(name)),
            events::DESTROYED => Ok(DatabaseEvent::Destroyed(name)),
            other => Err(unknown(other)),
        }
    }

    fn is_terminal(&self) -> bool {
        false
    }
}
