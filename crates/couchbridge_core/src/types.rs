//! Value types shared by requests and results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A JSON document body.
pub type Document = Map<String, Value>;

/// A loosely-typed option object as the store consumes it.
pub type Options = Map<String, Value>;

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";
/// Reserved field holding the revision token.
pub const REV_FIELD: &str = "_rev";
/// Reserved field marking a deletion.
pub const DELETED_FIELD: &str = "_deleted";
/// Reserved field listing conflicting leaf revisions.
pub const CONFLICTS_FIELD: &str = "_conflicts";
/// Reserved field holding revision history.
pub const REVISIONS_FIELD: &str = "_revisions";

/// Identifier plus optional revision token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Document id.
    pub id: String,
    /// Revision token; `None` targets "create or update blind".
    pub rev: Option<String>,
}

impl DocumentRef {
    /// A reference without revision.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
        }
    }

    /// A reference pinned to a revision.
    pub fn with_rev(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: Some(rev.into()),
        }
    }

    /// Reads `_id` and `_rev` from a document. An explicit `rev` wins over `_rev`.
    pub fn from_document(doc: &Document, rev: Option<&str>) -> Option<Self> {
        let id = doc.get(ID_FIELD)?.as_str()?.to_string();
        let rev = rev
            .map(str::to_string)
            .or_else(|| doc.get(REV_FIELD).and_then(Value::as_str).map(str::to_string));
        Some(Self { id, rev })
    }
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    /// Written document id.
    pub id: String,
    /// New revision token.
    pub rev: String,
}

/// A position in the store's change sequence.
///
/// Local stores use integers; clustered servers hand out opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sequence {
    /// Integer sequence.
    Number(u64),
    /// Opaque sequence token.
    Opaque(String),
}

impl Sequence {
    /// Returns the integer form, if any.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Sequence::Number(n) => Some(*n),
            Sequence::Opaque(_) => None,
        }
    }

    /// Converts to the JSON value the store expects.
    pub fn to_value(&self) -> Value {
        match self {
            Sequence::Number(n) => Value::from(*n),
            Sequence::Opaque(s) => Value::from(s.as_str()),
        }
    }
}

impl From<u64> for Sequence {
    fn from(n: u64) -> Self {
        Sequence::Number(n)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Number(n) => write!(f, "{n}"),
            Sequence::Opaque(s) => f.write_str(s),
        }
    }
}

/// One ancestor in a document's revision history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Generation number of the revision.
    pub sequence: u64,
    /// Revision hash.
    pub uuid: String,
}

impl RevisionInfo {
    /// Full revision token (`{sequence}-{uuid}`).
    pub fn token(&self) -> String {
        format!("{}-{}", self.sequence, self.uuid)
    }
}

/// The single result shape for fetched documents, change rows and query rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Document id. Empty for reduced query rows.
    pub id: String,
    /// Revision token, when known.
    pub rev: Option<String>,
    /// Document body.
    pub doc: Option<Document>,
    /// Change sequence, for change rows.
    pub sequence: Option<Sequence>,
    /// Conflicting leaf revisions.
    pub conflicts: Option<Vec<String>>,
    /// Revision history, oldest ancestor first.
    pub revisions: Option<Vec<RevisionInfo>>,
    /// View key, for query rows.
    pub key: Option<Value>,
    /// View value, for query rows.
    pub value: Option<Value>,
    /// Whether the change is a deletion.
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeRecord {
    /// A record carrying only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Result of an `all_docs` or `query` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Index of the first returned row.
    pub offset: u64,
    /// Rows in the whole index.
    pub total_rows: u64,
    /// Returned rows minus rows the store flagged with an error.
    pub docs: Vec<ChangeRecord>,
}

/// Store metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Store name.
    pub db_name: String,
    /// Non-deleted documents.
    #[serde(default)]
    pub doc_count: u64,
    /// Current update sequence.
    pub update_seq: Sequence,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_ref_prefers_explicit_rev() {
        let doc = json!({"_id": "a", "_rev": "1-x"});
        let doc = doc.as_object().unwrap();
        assert_eq!(
            DocumentRef::from_document(doc, None),
            Some(DocumentRef::with_rev("a", "1-x"))
        );
        assert_eq!(
            DocumentRef::from_document(doc, Some("2-y")),
            Some(DocumentRef::with_rev("a", "2-y"))
        );
        assert_eq!(DocumentRef::from_document(&Document::new(), None), None);
    }

    #[test]
    fn sequence_untagged_serde() {
        let n: Sequence = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(n, Sequence::Number(42));
        let s: Sequence = serde_json::from_value(json!("13-g1AAAA")).unwrap();
        assert_eq!(s.as_u64(), None);
        assert_eq!(s.to_string(), "13-g1AAAA");
    }

    #[test]
    fn revision_token() {
        let info = RevisionInfo {
            sequence: 3,
            uuid: "abc".into(),
        };
        assert_eq!(info.token(), "3-abc");
    }
}
