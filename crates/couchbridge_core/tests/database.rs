//! Integration tests for the database invoker over the memory store.

use couchbridge_core::{
    deletion_payload, translate, AllDocsOptions, CoreError, Database, DbOptions, GetOptions, Key,
    QueryOptions, Reducer, ResetStage, Sequence, ViewFunction, DELETED_FIELD, ID_FIELD, REV_FIELD,
};
use couchbridge_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::{json, Value};

fn ids(result: &couchbridge_core::QueryResult) -> Vec<&str> {
    result.docs.iter().map(|d| d.id.as_str()).collect()
}

fn by_date(doc: &couchbridge_core::Document) -> Vec<(Value, Value)> {
    vec![(
        json!([doc["year"], doc["month"]]),
        doc["amount"].clone(),
    )]
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn put_then_get() {
    init_test_tracing();
    let env = TestEnv::new();
    let db = env.open("todos");

    let written = db.put(doc(json!({"_id": "a", "title": "milk"})), None).await.unwrap();
    assert_eq!(written.id, "a");
    assert!(written.rev.starts_with("1-"));

    let fetched = db.get("a", &GetOptions::new()).await.unwrap();
    assert_eq!(fetched.rev.as_deref(), Some(written.rev.as_str()));
    assert_eq!(fetched.doc.unwrap()["title"], json!("milk"));
    assert_eq!(fetched.conflicts, None);
}

#[tokio::test]
async fn post_assigns_an_id() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let written = db.post(doc(json!({"title": "eggs"}))).await.unwrap();
    assert!(!written.id.is_empty());
    let fetched = db.get(&written.id, &GetOptions::new()).await.unwrap();
    assert_eq!(fetched.doc.unwrap()["title"], json!("eggs"));
}

#[tokio::test]
async fn get_reports_conflicts_and_winner() {
    let env = TestEnv::new();
    let db = env.open("todos");
    conflicted(&db, "d").await;

    let fetched = db.get("d", &GetOptions::new().conflicts(true)).await.unwrap();
    assert_eq!(fetched.rev.as_deref(), Some("2-right"));
    assert_eq!(fetched.conflicts, Some(vec!["2-left".to_string()]));
    assert_eq!(fetched.doc.unwrap()["side"], json!("right"));
}

#[tokio::test]
async fn get_revision_history_oldest_first() {
    let env = TestEnv::new();
    let db = env.open("todos");
    conflicted(&db, "d").await;

    let fetched = db.get("d", &GetOptions::new().revs(true)).await.unwrap();
    let tokens: Vec<String> = fetched
        .revisions
        .unwrap()
        .iter()
        .map(|r| r.token())
        .collect();
    assert_eq!(tokens, vec!["1-base", "2-right"]);
}

#[tokio::test]
async fn get_specific_revision() {
    let env = TestEnv::new();
    let db = env.open("todos");
    conflicted(&db, "d").await;

    let fetched = db.get("d", &GetOptions::new().rev("2-left")).await.unwrap();
    assert_eq!(fetched.doc.unwrap()["side"], json!("left"));
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let err = db.get("nope", &GetOptions::new()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn stale_write_conflicts() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let first = db.put(doc(json!({"_id": "a"})), None).await.unwrap();
    db.put(doc(json!({"_id": "a", "n": 2})), Some(&first.rev)).await.unwrap();

    let err = db
        .put(doc(json!({"_id": "a", "n": 3})), Some(&first.rev))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    let err = db.put(doc(json!({"_id": "a"})), None).await.unwrap_err();
    assert_eq!(err.store_error().map(|e| e.status), Some(Some(409)));
}

#[tokio::test]
async fn explicit_rev_wins_over_payload_rev() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let first = db.put(doc(json!({"_id": "a"})), None).await.unwrap();
    let second = db
        .put(doc(json!({"_id": "a", "_rev": "1-bogus"})), Some(&first.rev))
        .await
        .unwrap();
    assert!(second.rev.starts_with("2-"));
}

#[tokio::test]
async fn remove_document() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let written = db.put(doc(json!({"_id": "a"})), None).await.unwrap();
    let fetched = db.get("a", &GetOptions::new()).await.unwrap();

    let removed = db.remove(&fetched.doc.unwrap(), None).await.unwrap();
    assert!(removed.rev.starts_with("2-"));
    assert_ne!(removed.rev, written.rev);

    let err = db.get("a", &GetOptions::new()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.store_error().and_then(|e| e.reason.as_deref()), Some("deleted"));

    // A deleted document can be written again without a rev.
    db.put(doc(json!({"_id": "a"})), None).await.unwrap();
}

#[tokio::test]
async fn remove_by_id_needs_the_current_rev() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let written = db.put(doc(json!({"_id": "a"})), None).await.unwrap();

    assert!(db.remove_by_id("a", None).await.unwrap_err().is_conflict());
    db.remove_by_id("a", Some(&written.rev)).await.unwrap();
    assert_eq!(memory_store(&db).doc_count(), 0);
}

#[tokio::test]
async fn remove_without_id_is_invalid() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let err = db.remove(&doc(json!({"title": "x"})), None).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidDocument { .. }));
}

// ============================================================================
// Listing and views
// ============================================================================

#[tokio::test]
async fn all_docs_by_keys_drops_error_rows() {
    let env = TestEnv::new();
    let db = env.open("todos");
    scenarios::populated(&db, 3).await;

    let options = AllDocsOptions::new()
        .include_docs(true)
        .keys(["doc-000", "missing", "doc-002"]);
    let result = db.all_docs(&options).await.unwrap();
    assert_eq!(ids(&result), vec!["doc-000", "doc-002"]);
    assert!(result.docs.iter().all(|d| d.doc.is_some()));
}

#[tokio::test]
async fn all_docs_range_and_paging() {
    let env = TestEnv::new();
    let db = env.open("todos");
    scenarios::populated(&db, 6).await;

    let options = AllDocsOptions::new().startkey("doc-001").endkey("doc-004");
    let result = db.all_docs(&options).await.unwrap();
    assert_eq!(ids(&result), vec!["doc-001", "doc-002", "doc-003", "doc-004"]);
    assert_eq!(result.total_rows, 6);

    let options = AllDocsOptions::new().descending(true).skip(1).limit(2);
    let result = db.all_docs(&options).await.unwrap();
    assert_eq!(ids(&result), vec!["doc-004", "doc-003"]);

    let options = AllDocsOptions::new()
        .startkey("doc-001")
        .endkey("doc-003")
        .inclusive_end(false);
    let result = db.all_docs(&options).await.unwrap();
    assert_eq!(ids(&result), vec!["doc-001", "doc-002"]);
}

#[tokio::test]
async fn named_view_grouped_by_year() {
    let env = TestEnv::new();
    let db = env.open("shop");
    memory_store(&db).define_view("sales/by_date", by_date, Some(Reducer::Sum));
    scenarios::sales(&db).await;

    let options = QueryOptions::new(ViewFunction::named("sales/by_date")).group_level(1);
    let result = db.query(&options).await.unwrap();
    let totals: Vec<(Value, Value)> = result
        .docs
        .iter()
        .map(|row| (row.key.clone().unwrap(), row.value.clone().unwrap()))
        .collect();
    assert_eq!(
        totals,
        vec![(json!(["2024"]), json!(30)), (json!(["2025"]), json!(70))]
    );
}

#[tokio::test]
async fn composite_prefix_range() {
    let env = TestEnv::new();
    let db = env.open("shop");
    scenarios::sales(&db).await;

    let rows = AllDocsOptions::new()
        .startkey(Key::composite(["2025"]))
        .endkey(Key::composite([Value::from("2025"), Key::high()]));
    let options = QueryOptions::new(ViewFunction::map(by_date)).rows(rows);
    let result = db.query(&options).await.unwrap();
    assert_eq!(ids(&result), vec!["s3", "s4"]);
}

#[tokio::test]
async fn temporary_view_with_builtin_reducer() {
    let env = TestEnv::new();
    let db = env.open("shop");
    scenarios::sales(&db).await;

    let options = QueryOptions::new(ViewFunction::map(by_date)).reduce(Reducer::Count);
    let result = db.query(&options).await.unwrap();
    assert_eq!(result.docs.len(), 1);
    assert_eq!(result.docs[0].value, Some(json!(4)));
}

#[tokio::test]
async fn temporary_map_reduce_view() {
    let env = TestEnv::new();
    let db = env.open("shop");
    scenarios::sales(&db).await;

    let fun = ViewFunction::map_reduce(by_date, |_: &[Value], values: &[Value], _: bool| {
        json!(values.iter().filter_map(Value::as_i64).max())
    });
    let result = db.query(&QueryOptions::new(fun)).await.unwrap();
    assert_eq!(result.docs[0].value, Some(json!(40)));
}

#[tokio::test]
async fn reduce_with_include_docs_is_rejected() {
    let env = TestEnv::new();
    let db = env.open("shop");
    scenarios::sales(&db).await;

    let options = QueryOptions::new(ViewFunction::map(by_date))
        .reduce(Reducer::Sum)
        .rows(AllDocsOptions::new().include_docs(true));
    let err = db.query(&options).await.unwrap_err();
    assert_eq!(err.store_error().map(|e| e.name.as_str()), Some("query_parse_error"));
}

#[tokio::test]
async fn missing_named_view_is_not_found() {
    let env = TestEnv::new();
    let db = env.open("shop");
    let err = db
        .query(&QueryOptions::new(ViewFunction::named("nope/nope")))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Database lifecycle
// ============================================================================

#[tokio::test]
async fn info_reports_counts() {
    let env = TestEnv::new();
    let db = env.open("todos");
    scenarios::populated(&db, 2).await;

    let info = db.info().await.unwrap();
    assert_eq!(info.db_name, "todos");
    assert_eq!(info.doc_count, 2);
    assert_eq!(info.update_seq, Sequence::Number(2));
}

#[tokio::test]
async fn destroyed_handle_refuses_calls() {
    let env = TestEnv::new();
    let db = env.open("todos");
    let clone = db.clone();
    db.destroy().await.unwrap();

    assert!(clone.is_destroyed());
    let err = clone.get("a", &GetOptions::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::DatabaseDestroyed { ref name } if name == "todos"));
    assert!(matches!(db.destroy().await, Err(CoreError::DatabaseDestroyed { .. })));
}

#[tokio::test]
async fn destructive_reset_yields_an_empty_database() {
    let env = TestEnv::new();
    let db = env.open("todos");
    scenarios::populated(&db, 3).await;

    let fresh = db.destructive_reset().await.unwrap();
    assert!(db.is_destroyed());
    assert!(!fresh.is_destroyed());
    assert!(fresh.all_docs(&AllDocsOptions::new()).await.unwrap().docs.is_empty());
    assert_eq!(env.store("todos").doc_count(), 0);
}

#[tokio::test]
async fn destructive_reset_of_destroyed_handle_fails_at_destroy() {
    let env = TestEnv::new();
    let db = env.open("todos");
    db.destroy().await.unwrap();

    let err = db.destructive_reset().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::DestructiveReset {
            stage: ResetStage::Destroy,
            ..
        }
    ));
}

#[tokio::test]
async fn skip_setup_refuses_missing_databases() {
    let env = TestEnv::new();
    let err = Database::open(env.connector(), "ghost", DbOptions::new().skip_setup(true))
        .unwrap_err();
    assert!(err.is_not_found());

    env.open("ghost");
    Database::open(env.connector(), "ghost", DbOptions::new().skip_setup(true)).unwrap();
}

// ============================================================================
// Property-based tests
// ============================================================================

proptest! {
    #[test]
    fn error_rows_never_surface((payload, kept) in rows_with_errors_strategy()) {
        let result = translate::all_docs(&payload).unwrap();
        let ids: Vec<String> = result.docs.into_iter().map(|d| d.id).collect();
        prop_assert_eq!(ids, kept);
    }

    #[test]
    fn deletion_payload_targets_the_ref(target in document_ref_strategy()) {
        let payload = deletion_payload(&target);
        prop_assert_eq!(payload.get(ID_FIELD), Some(&json!(target.id.as_str())));
        prop_assert_eq!(payload.get(DELETED_FIELD), Some(&json!(true)));
        prop_assert_eq!(
            payload.get(REV_FIELD).and_then(Value::as_str),
            target.rev.as_deref()
        );
    }
}
