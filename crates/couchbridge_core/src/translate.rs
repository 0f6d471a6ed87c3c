//! Translation of raw store payloads into typed results.

use crate::error::{CoreError, CoreResult, StoreError};
use crate::types::{
    ChangeRecord, DatabaseInfo, Document, PutResponse, QueryResult, RevisionInfo, Sequence,
    CONFLICTS_FIELD, ID_FIELD, REVISIONS_FIELD, REV_FIELD,
};
use serde::Deserialize;
use serde_json::Value;

/// Builds a [`StoreError`] from an error payload.
///
/// Missing fields fall back to an `unknown_error` name and an empty message
/// so a malformed payload still yields an error value.
pub fn store_error(payload: &Value) -> StoreError {
    let status = payload
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());
    let name = payload
        .get("name")
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let reason = payload
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    StoreError {
        status,
        name: name.to_string(),
        message: message.to_string(),
        reason,
    }
}

/// Reads a sequence value.
pub fn sequence(value: &Value) -> Option<Sequence> {
    match value {
        Value::Number(n) => n.as_u64().map(Sequence::Number),
        Value::String(s) => Some(Sequence::Opaque(s.clone())),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

/// Translates a write acknowledgement.
pub fn put_response(payload: &Value) -> CoreResult<PutResponse> {
    #[derive(Deserialize)]
    struct Raw {
        id: String,
        rev: String,
    }
    let raw = Raw::deserialize(payload)
        .map_err(|e| CoreError::unexpected_response(format!("write response: {e}")))?;
    Ok(PutResponse {
        id: raw.id,
        rev: raw.rev,
    })
}

/// Pairs each ancestor id with its generation.
///
/// `ids[i]` is generation `start - i`. The result is ordered oldest
/// ancestor first, the reverse of the store's order.
pub fn revision_history(revisions: &Value) -> CoreResult<Vec<RevisionInfo>> {
    #[derive(Deserialize)]
    struct Raw {
        start: u64,
        ids: Vec<String>,
    }
    let raw = Raw::deserialize(revisions)
        .map_err(|e| CoreError::unexpected_response(format!("revision history: {e}")))?;
    raw.ids
        .into_iter()
        .enumerate()
        .rev()
        .map(|(i, uuid)| {
            let sequence = raw.start.checked_sub(i as u64).ok_or_else(|| {
                CoreError::unexpected_response("revision history is longer than its start")
            })?;
            Ok(RevisionInfo { sequence, uuid })
        })
        .collect()
}

/// Translates a fetched document.
///
/// `_conflicts` and `_revisions` move into their own fields; every other
/// field, `_id` and `_rev` included, stays in the body.
pub fn document(payload: Value) -> CoreResult<ChangeRecord> {
    let Value::Object(mut body) = payload else {
        return Err(CoreError::unexpected_response("document is not an object"));
    };
    let id = body
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::unexpected_response("document has no _id"))?
        .to_string();
    let rev = body
        .get(REV_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);

    let conflicts = match body.remove(CONFLICTS_FIELD) {
        Some(value) => Some(
            serde_json::from_value::<Vec<String>>(value)
                .map_err(|e| CoreError::unexpected_response(format!("_conflicts: {e}")))?,
        ),
        None => None,
    };
    let revisions = match body.remove(REVISIONS_FIELD) {
        Some(value) => Some(revision_history(&value)?),
        None => None,
    };

    Ok(ChangeRecord {
        id,
        rev,
        doc: Some(body),
        conflicts,
        revisions,
        ..ChangeRecord::default()
    })
}

#[derive(Deserialize)]
struct RawRows {
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    rows: Vec<Value>,
}

fn rows(payload: &Value, what: &str) -> CoreResult<RawRows> {
    RawRows::deserialize(payload)
        .map_err(|e| CoreError::unexpected_response(format!("{what} response: {e}")))
}

fn included_doc(row: &Value) -> Option<Document> {
    row.get("doc").and_then(Value::as_object).cloned()
}

/// Translates an `all_docs` response. Rows flagged with `error` are dropped;
/// any other row without an `id` fails the whole response.
pub fn all_docs(payload: &Value) -> CoreResult<QueryResult> {
    let raw = rows(payload, "all_docs")?;
    let docs = raw
        .rows
        .iter()
        .filter(|row| row.get("error").is_none())
        .map(|row| {
            let id = str_field(row, "id")
                .ok_or_else(|| CoreError::unexpected_response("all_docs row without id"))?;
            Ok(ChangeRecord {
                id: id.to_string(),
                rev: row
                    .get("value")
                    .and_then(|v| str_field(v, "rev"))
                    .map(str::to_string),
                doc: included_doc(row),
                deleted: row
                    .get("value")
                    .and_then(|v| v.get("deleted"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                ..ChangeRecord::default()
            })
        })
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(QueryResult {
        offset: raw.offset,
        total_rows: raw.total_rows,
        docs,
    })
}

/// Translates a view `query` response. Rows flagged with `error` are dropped.
pub fn query(payload: &Value) -> CoreResult<QueryResult> {
    let raw = rows(payload, "query")?;
    let docs = raw
        .rows
        .iter()
        .filter(|row| row.get("error").is_none())
        .map(|row| {
            let doc = included_doc(row);
            ChangeRecord {
                id: str_field(row, "id").unwrap_or_default().to_string(),
                rev: doc
                    .as_ref()
                    .and_then(|d| d.get(REV_FIELD))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                doc,
                key: row.get("key").cloned(),
                value: row.get("value").cloned(),
                ..ChangeRecord::default()
            }
        })
        .collect();
    Ok(QueryResult {
        offset: raw.offset,
        total_rows: raw.total_rows,
        docs,
    })
}

/// Translates one change-feed row.
pub fn change(payload: &Value) -> CoreResult<ChangeRecord> {
    let id = str_field(payload, "id")
        .ok_or_else(|| CoreError::unexpected_response("change has no id"))?;
    let rev = payload
        .get("changes")
        .and_then(Value::as_array)
        .and_then(|changes| changes.first())
        .and_then(|first| str_field(first, "rev"))
        .map(str::to_string);
    let doc = included_doc(payload);
    let conflicts = doc
        .as_ref()
        .and_then(|d| d.get(CONFLICTS_FIELD))
        .and_then(|c| serde_json::from_value::<Vec<String>>(c.clone()).ok());
    Ok(ChangeRecord {
        id: id.to_string(),
        rev,
        doc,
        sequence: payload.get("seq").and_then(sequence),
        conflicts,
        deleted: payload
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ..ChangeRecord::default()
    })
}

/// Translates a store info payload.
pub fn info(payload: &Value) -> CoreResult<DatabaseInfo> {
    DatabaseInfo::deserialize(payload)
        .map_err(|e| CoreError::unexpected_response(format!("info response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_fields_preserved() {
        let err = store_error(&json!({
            "status": 409,
            "name": "conflict",
            "message": "Document update conflict",
            "reason": "stale rev"
        }));
        assert_eq!(err.status, Some(409));
        assert_eq!(err.name, "conflict");
        assert_eq!(err.message, "Document update conflict");
        assert_eq!(err.reason.as_deref(), Some("stale rev"));
    }

    #[test]
    fn error_from_couch_body() {
        let err = store_error(&json!({"error": "not_found", "reason": "missing"}));
        assert_eq!(err.name, "not_found");
        assert_eq!(err.status, None);
    }

    #[test]
    fn put_response_shape() {
        let resp = put_response(&json!({"ok": true, "id": "a", "rev": "1-x"})).unwrap();
        assert_eq!(resp.id, "a");
        assert_eq!(resp.rev, "1-x");
        assert!(put_response(&json!({"ok": true})).is_err());
    }

    #[test]
    fn revision_history_is_oldest_first() {
        let revs = revision_history(&json!({"start": 3, "ids": ["c", "b", "a"]})).unwrap();
        let pairs: Vec<_> = revs.iter().map(|r| (r.sequence, r.uuid.as_str())).collect();
        assert_eq!(pairs, vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn revision_history_rejects_underflow() {
        assert!(revision_history(&json!({"start": 1, "ids": ["b", "a"]})).is_ok());
        assert!(revision_history(&json!({"start": 1, "ids": ["c", "b", "a"]})).is_err());
    }

    #[test]
    fn document_split_is_order_independent() {
        let a = json!({
            "_conflicts": ["2-b"],
            "_id": "doc1",
            "title": "x",
            "_revisions": {"start": 2, "ids": ["a", "z"]},
            "_rev": "2-a"
        });
        let b = json!({
            "_rev": "2-a",
            "_revisions": {"start": 2, "ids": ["a", "z"]},
            "title": "x",
            "_id": "doc1",
            "_conflicts": ["2-b"]
        });
        let ra = document(a).unwrap();
        let rb = document(b).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(ra.conflicts, Some(vec!["2-b".to_string()]));
        assert_eq!(ra.rev.as_deref(), Some("2-a"));
        let doc = ra.doc.unwrap();
        assert_eq!(doc.len(), 3);
        assert!(doc.contains_key("_id"));
        assert!(!doc.contains_key("_conflicts"));
        assert!(!doc.contains_key("_revisions"));
    }

    #[test]
    fn document_without_metadata() {
        let rec = document(json!({"_id": "a", "_rev": "1-x"})).unwrap();
        assert_eq!(rec.conflicts, None);
        assert_eq!(rec.revisions, None);
        assert_eq!(rec.sequence, None);
    }

    #[test]
    fn all_docs_drops_error_rows() {
        let payload = json!({
            "offset": 0,
            "total_rows": 3,
            "rows": [
                {"id": "a", "key": "a", "value": {"rev": "1-a"}},
                {"key": "missing", "error": "not_found"},
                {"id": "c", "key": "c", "value": {"rev": "1-c"}, "doc": {"_id": "c", "_rev": "1-c"}}
            ]
        });
        let result = all_docs(&payload).unwrap();
        assert_eq!(result.total_rows, 3);
        let ids: Vec<_> = result.docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(result.docs[0].rev.as_deref(), Some("1-a"));
        assert!(result.docs[0].doc.is_none());
        assert!(result.docs[1].doc.is_some());
    }

    #[test]
    fn all_docs_rejects_rows_without_id() {
        let payload = json!({
            "offset": 0,
            "total_rows": 2,
            "rows": [
                {"id": "a", "key": "a", "value": {"rev": "1-a"}},
                {"key": "b", "value": {"rev": "1-b"}}
            ]
        });
        assert!(matches!(
            all_docs(&payload),
            Err(CoreError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn query_rows_keep_key_and_value() {
        let payload = json!({
            "offset": 1,
            "total_rows": 4,
            "rows": [
                {"id": "a", "key": ["x", 1], "value": 2, "doc": {"_id": "a", "_rev": "3-a"}},
                {"id": "b", "key": "y", "value": null, "error": "forbidden"},
                {"key": null, "value": 7}
            ]
        });
        let result = query(&payload).unwrap();
        assert_eq!(result.offset, 1);
        assert_eq!(result.docs.len(), 2);
        assert_eq!(result.docs[0].rev.as_deref(), Some("3-a"));
        assert_eq!(result.docs[0].key, Some(json!(["x", 1])));
        assert_eq!(result.docs[1].id, "");
        assert_eq!(result.docs[1].value, Some(json!(7)));
    }

    #[test]
    fn change_row() {
        let rec = change(&json!({
            "id": "x",
            "seq": 12,
            "changes": [{"rev": "1-abc"}],
            "doc": {"_id": "x", "_rev": "1-abc"}
        }))
        .unwrap();
        assert_eq!(rec.id, "x");
        assert_eq!(rec.rev.as_deref(), Some("1-abc"));
        assert_eq!(rec.sequence, Some(Sequence::Number(12)));
        assert!(!rec.deleted);
    }

    #[test]
    fn deleted_change_row() {
        let rec = change(&json!({
            "id": "x",
            "seq": "7-g1",
            "deleted": true,
            "changes": [{"rev": "2-d"}]
        }))
        .unwrap();
        assert!(rec.deleted);
        assert_eq!(rec.sequence, Some(Sequence::Opaque("7-g1".into())));
        assert!(rec.doc.is_none());
    }
}
