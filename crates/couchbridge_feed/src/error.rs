//! Error types for feed subscriptions.

use couchbridge_core::{CoreError, StoreError};
use thiserror::Error;

/// Result type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors that can occur while opening or reading a feed.
///
/// Errors reported by a running feed are not `FeedError`s; they arrive as
/// `Error(..)` events on the subscription.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The store refused to open the feed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The database handle cannot be used.
    #[error("database error: {0}")]
    Core(#[from] CoreError),

    /// The subscription has no more events and never will.
    #[error("feed channel closed")]
    ChannelClosed,
}

impl FeedError {
    /// Returns the store error behind this failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            FeedError::Store(err) => Some(err),
            FeedError::Core(err) => err.store_error(),
            FeedError::ChannelClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_reachable_through_core() {
        let err = FeedError::from(CoreError::from(StoreError::not_found("missing")));
        assert_eq!(err.store_error().map(|e| e.status), Some(Some(404)));
        assert!(FeedError::ChannelClosed.store_error().is_none());
    }

    #[test]
    fn display() {
        let err = FeedError::from(StoreError::forbidden("read-only"));
        assert_eq!(err.to_string(), "store error: forbidden: read-only");
    }
}
