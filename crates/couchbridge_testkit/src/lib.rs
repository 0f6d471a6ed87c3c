//! # Couchbridge Testkit
//!
//! Test utilities for couchbridge.
//!
//! This crate provides:
//! - An in-memory CouchDB-compatible store ([`MemoryStore`]) and connector
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use couchbridge_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_database() {
//!     let env = TestEnv::new();
//!     let db = env.open("todos");
//!     db.put(doc(json!({"_id": "a"})), None).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collate;
mod connector;
mod feed;
pub mod fixtures;
pub mod generators;
mod memory;
mod revisions;
mod rows;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::connector::MemoryConnector;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::MemoryStore;
}

pub use collate::collate;
pub use connector::MemoryConnector;
pub use fixtures::*;
pub use generators::*;
pub use memory::{destroyed_error, error_payload, MemoryStore};
