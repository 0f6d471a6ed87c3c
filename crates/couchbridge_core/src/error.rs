//! Error types for couchbridge core.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for raw store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// An error reported by the document store, with its fields preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct StoreError {
    /// HTTP-style status code, when the store supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Short machine name (`conflict`, `not_found`, ...).
    pub name: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable reason, when the store supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Revision mismatch on write.
    Conflict,
    /// Document or database does not exist.
    NotFound,
    /// Malformed request rejected by the store.
    Validation,
    /// Authorization refusal.
    Denied,
    /// Transport failure, potentially transient.
    Connectivity,
    /// Anything else.
    Other,
}

impl StoreError {
    /// Creates a store error.
    pub fn new(status: Option<u16>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            name: name.into(),
            message: message.into(),
            reason: None,
        }
    }

    /// Attaches a machine-readable reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a 409 conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Some(409), "conflict", message)
    }

    /// Creates a 404 not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(404), "not_found", message)
    }

    /// Creates a 400 bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Some(400), "bad_request", message)
    }

    /// Creates a 403 forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Some(403), "forbidden", message)
    }

    /// Classifies the error by status, falling back to the name.
    pub fn kind(&self) -> ErrorKind {
        match self.status {
            Some(409) => ErrorKind::Conflict,
            Some(404) => ErrorKind::NotFound,
            Some(400) | Some(412) | Some(415) => ErrorKind::Validation,
            Some(401) | Some(403) => ErrorKind::Denied,
            Some(0) | Some(500..=599) => ErrorKind::Connectivity,
            Some(_) => ErrorKind::Other,
            None => match self.name.as_str() {
                "conflict" => ErrorKind::Conflict,
                "not_found" => ErrorKind::NotFound,
                "bad_request" | "invalid_rev" | "doc_validation" => ErrorKind::Validation,
                "unauthorized" | "forbidden" => ErrorKind::Denied,
                "network_error" | "timeout" | "econnrefused" => ErrorKind::Connectivity,
                _ => ErrorKind::Other,
            },
        }
    }

    /// Returns true if retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

/// The step of a destructive reset that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStage {
    /// Destroying the existing store.
    Destroy,
    /// Opening a fresh store under the same name.
    Reopen,
    /// Listing the fresh store to confirm it is usable.
    Verify,
}

impl fmt::Display for ResetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResetStage::Destroy => "destroy",
            ResetStage::Reopen => "reopen",
            ResetStage::Verify => "verify",
        })
    }
}

/// Errors that can occur in couchbridge core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The store rejected the request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The handle was used after `destroy`.
    #[error("database {name} has been destroyed")]
    DatabaseDestroyed {
        /// Name of the destroyed database.
        name: String,
    },

    /// Destroy-then-reopen did not complete.
    #[error("destructive reset of {name} failed during {stage}: {source}")]
    DestructiveReset {
        /// Database name.
        name: String,
        /// Step that failed.
        stage: ResetStage,
        /// Underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// The document cannot be written as given.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// The store answered with a payload of the wrong shape.
    #[error("unexpected store response: {message}")]
    UnexpectedResponse {
        /// Description of the mismatch.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an unexpected response error.
    pub fn unexpected_response(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Returns the store error behind this failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            CoreError::Store(err) => Some(err),
            CoreError::DestructiveReset { source, .. } => source.store_error(),
            _ => None,
        }
    }

    /// Returns true for revision conflicts.
    pub fn is_conflict(&self) -> bool {
        self.store_error()
            .is_some_and(|e| e.kind() == ErrorKind::Conflict)
    }

    /// Returns true for missing documents or databases.
    pub fn is_not_found(&self) -> bool {
        self.store_error()
            .is_some_and(|e| e.kind() == ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_status() {
        assert_eq!(StoreError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(StoreError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(StoreError::bad_request("x").kind(), ErrorKind::Validation);
        assert_eq!(StoreError::forbidden("x").kind(), ErrorKind::Denied);
        assert_eq!(
            StoreError::new(Some(503), "unavailable", "down").kind(),
            ErrorKind::Connectivity
        );
    }

    #[test]
    fn kind_from_name_without_status() {
        let err = StoreError::new(None, "unauthorized", "nope");
        assert_eq!(err.kind(), ErrorKind::Denied);
        let err = StoreError::new(None, "database_destroyed", "gone");
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(!err.is_retryable());
        assert!(StoreError::new(None, "network_error", "reset").is_retryable());
    }

    #[test]
    fn reset_error_exposes_store_error() {
        let err = CoreError::DestructiveReset {
            name: "db".into(),
            stage: ResetStage::Destroy,
            source: Box::new(CoreError::Store(StoreError::not_found("missing"))),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("during destroy"));
    }

    #[test]
    fn error_display() {
        let err = StoreError::conflict("Document update conflict").with_reason("rev mismatch");
        assert_eq!(err.to_string(), "conflict: Document update conflict");
        assert_eq!(err.reason.as_deref(), Some("rev mismatch"));
    }
}
