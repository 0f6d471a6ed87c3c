//! Property-based test generators using proptest.
//!
//! Provides strategies for generating store payloads and request values
//! that keep the invariants real stores guarantee.

use couchbridge_core::{Document, DocumentRef, Key};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating revision tokens (`<generation>-<hash>`).
pub fn rev_strategy() -> impl Strategy<Value = String> {
    (
        1u64..50,
        prop::string::string_regex("[0-9a-f]{32}").expect("Invalid regex"),
    )
        .prop_map(|(generation, hash)| format!("{generation}-{hash}"))
}

/// Strategy for generating document references, with or without a rev.
pub fn document_ref_strategy() -> impl Strategy<Value = DocumentRef> {
    (doc_id_strategy(), prop::option::of(rev_strategy()))
        .prop_map(|(id, rev)| DocumentRef { id, rev })
}

/// Strategy for generating scalar JSON values usable as keys.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for generating scalar keys.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    scalar_strategy().prop_map(Key::Scalar)
}

/// Strategy for generating composite keys of 1 to 4 components.
pub fn composite_key_strategy() -> impl Strategy<Value = Key> {
    prop::collection::vec(scalar_strategy(), 1..5).prop_map(Key::Composite)
}

/// Strategy for generating user documents (no reserved fields besides `_id`).
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        doc_id_strategy(),
        prop::collection::btree_map(
            prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
            scalar_strategy(),
            0..6,
        ),
    )
        .prop_map(|(id, fields)| {
            let mut doc: Document = fields.into_iter().collect();
            doc.insert("_id".into(), Value::from(id));
            doc
        })
}

/// Strategy for generating a `_revisions` object whose ids never outnumber
/// its start generation.
pub fn revisions_strategy() -> impl Strategy<Value = Value> {
    (1u64..20)
        .prop_flat_map(|start| {
            let max = usize::try_from(start).unwrap_or(1);
            (
                Just(start),
                prop::collection::vec(
                    prop::string::string_regex("[0-9a-f]{8}").expect("Invalid regex"),
                    1..=max,
                ),
            )
        })
        .prop_map(|(start, ids)| json!({"start": start, "ids": ids}))
}

/// Strategy for generating an `all_docs`-shaped response in which some rows
/// carry a row-level error. Yields the payload and the ids of the rows
/// without error, in order.
pub fn rows_with_errors_strategy() -> impl Strategy<Value = (Value, Vec<String>)> {
    prop::collection::vec((doc_id_strategy(), rev_strategy(), any::<bool>()), 0..20).prop_map(
        |rows| {
            let mut kept = Vec::new();
            let rows: Vec<Value> = rows
                .into_iter()
                .map(|(id, rev, failed)| {
                    if failed {
                        json!({"key": id, "error": "not_found"})
                    } else {
                        kept.push(id.clone());
                        json!({
                            "id": id,
                            "key": id,
                            "value": {"rev": rev},
                            "doc": {"_id": id, "_rev": rev},
                        })
                    }
                })
                .collect();
            let total = rows.len();
            (
                json!({"total_rows": total, "offset": 0, "rows": rows}),
                kept,
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_revs_parse(rev in rev_strategy()) {
            let (generation, hash) = rev.split_once('-').unwrap();
            prop_assert!(generation.parse::<u64>().unwrap() >= 1);
            prop_assert_eq!(hash.len(), 32);
        }

        #[test]
        fn revisions_fit_their_start(revisions in revisions_strategy()) {
            let start = revisions["start"].as_u64().unwrap();
            let ids = revisions["ids"].as_array().unwrap().len() as u64;
            prop_assert!(ids <= start);
        }

        #[test]
        fn documents_carry_an_id(doc in document_strategy()) {
            prop_assert!(doc.get("_id").and_then(Value::as_str).is_some());
        }
    }
}
