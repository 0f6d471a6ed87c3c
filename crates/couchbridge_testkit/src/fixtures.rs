//! Test fixtures and database helpers.
//!
//! Provides convenience functions for opening memory-backed databases
//! and seeding common scenarios.

use crate::connector::MemoryConnector;
use crate::memory::MemoryStore;
use couchbridge_core::{Database, DbOptions, Document, DocumentStore, Options, StoreConnector};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A memory connector plus helpers to open databases through it.
#[derive(Clone, Default)]
pub struct TestEnv {
    /// The shared connector.
    pub connector: Arc<MemoryConnector>,
}

impl TestEnv {
    /// Creates an environment without databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connector as the trait object [`Database::open`] expects.
    pub fn connector(&self) -> Arc<dyn StoreConnector> {
        Arc::clone(&self.connector) as Arc<dyn StoreConnector>
    }

    /// Opens `name` with default options.
    pub fn open(&self, name: &str) -> Database {
        self.open_with(name, DbOptions::default())
    }

    /// Opens `name` with `options`.
    pub fn open_with(&self, name: &str, options: DbOptions) -> Database {
        Database::open(self.connector(), name, options).expect("Failed to open memory database")
    }

    /// The live store behind `name`.
    pub fn store(&self, name: &str) -> MemoryStore {
        self.connector
            .store(name)
            .expect("Memory store should have been opened")
    }
}

/// The memory store behind `db`.
///
/// # Panics
///
/// Panics if `db` is not backed by a [`MemoryStore`].
pub fn memory_store(db: &Database) -> &MemoryStore {
    db.store()
        .as_any()
        .downcast_ref::<MemoryStore>()
        .expect("Database should be backed by a memory store")
}

/// Writes a revision as given, bypassing revision checks
/// (`new_edits: false`).
pub async fn put_revision(db: &Database, revision: Value) -> String {
    let mut options = Options::new();
    options.insert("new_edits".into(), json!(false));
    let written = db
        .store()
        .put(doc(revision), options)
        .await
        .expect("Failed to store revision");
    written["rev"]
        .as_str()
        .expect("Write response should carry a rev")
        .to_string()
}

/// Seeds `id` with two conflicting children of `1-base`:
/// `2-left` (losing) and `2-right` (winning).
pub async fn conflicted(db: &Database, id: &str) {
    put_revision(db, json!({"_id": id, "_rev": "1-base", "side": "base"})).await;
    put_revision(
        db,
        json!({
            "_id": id,
            "_rev": "2-left",
            "_revisions": {"start": 2, "ids": ["left", "base"]},
            "side": "left",
        }),
    )
    .await;
    put_revision(
        db,
        json!({
            "_id": id,
            "_rev": "2-right",
            "_revisions": {"start": 2, "ids": ["right", "base"]},
            "side": "right",
        }),
    )
    .await;
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Writes `count` documents `doc-000`.. with an `index` field.
    pub async fn populated(db: &Database, count: usize) -> Vec<String> {
        let mut revs = Vec::with_capacity(count);
        for i in 0..count {
            let written = db
                .put(doc(json!({"_id": format!("doc-{i:03}"), "index": i})), None)
                .await
                .expect("Failed to put document");
            revs.push(written.rev);
        }
        revs
    }

    /// Writes sales documents keyed by `[year, month]` for view tests.
    pub async fn sales(db: &Database) {
        let rows = [
            ("s1", "2024", "01", 10),
            ("s2", "2024", "02", 20),
            ("s3", "2025", "01", 30),
            ("s4", "2025", "03", 40),
        ];
        for (id, year, month, amount) in rows {
            db.put(
                doc(json!({"_id": id, "year": year, "month": month, "amount": amount})),
                None,
            )
            .await
            .expect("Failed to put sale");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_env_opens_memory_databases() {
        let env = TestEnv::new();
        let db = env.open("fixtures");
        assert_eq!(memory_store(&db).update_seq(), 0);
        scenarios::populated(&db, 3).await;
        assert_eq!(env.store("fixtures").doc_count(), 3);
    }

    #[tokio::test]
    async fn conflicted_seeds_two_leaves() {
        let env = TestEnv::new();
        let db = env.open("conflicts");
        conflicted(&db, "d").await;
        let store = memory_store(&db);
        assert_eq!(store.winning_rev("d").as_deref(), Some("2-right"));
        assert_eq!(store.conflicts("d"), vec!["2-left".to_string()]);
    }
}
