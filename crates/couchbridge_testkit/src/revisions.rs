//! Per-document revision trees.

use couchbridge_core::{
    Document, CONFLICTS_FIELD, DELETED_FIELD, ID_FIELD, REVISIONS_FIELD, REV_FIELD,
};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// One revision of a document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Revision {
    pub rev: String,
    pub generation: u64,
    pub parent: Option<String>,
    pub body: Document,
    pub deleted: bool,
}

impl Revision {
    /// Renders the revision as a full document.
    pub fn render(&self, id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), Value::from(id));
        doc.insert(REV_FIELD.into(), Value::from(self.rev.as_str()));
        for (k, v) in &self.body {
            doc.insert(k.clone(), v.clone());
        }
        if self.deleted {
            doc.insert(DELETED_FIELD.into(), Value::Bool(true));
        }
        doc
    }

    fn sort_key(&self) -> (bool, u64, &str) {
        (!self.deleted, self.generation, self.rev.as_str())
    }
}

/// Splits `"3-abc"` into `(3, "abc")`.
pub(crate) fn parse_rev(rev: &str) -> Option<(u64, &str)> {
    let (generation, hash) = rev.split_once('-')?;
    let generation = generation.parse().ok()?;
    if hash.is_empty() {
        return None;
    }
    Some((generation, hash))
}

/// Creates a fresh revision token of the given generation.
pub(crate) fn new_rev(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

/// Removes the metadata fields a stored body never carries.
pub(crate) fn strip_metadata(mut doc: Document) -> Document {
    for field in [ID_FIELD, REV_FIELD, DELETED_FIELD, REVISIONS_FIELD, CONFLICTS_FIELD] {
        doc.remove(field);
    }
    doc
}

/// All known revisions of one document.
#[derive(Debug, Clone, Default)]
pub(crate) struct DocTree {
    revisions: HashMap<String, Revision>,
    leaves: BTreeSet<String>,
    /// Update sequence of the last change to this document.
    pub seq: u64,
}

impl DocTree {
    /// The winning revision: live before deleted, then highest generation,
    /// then highest token.
    pub fn winner(&self) -> Option<&Revision> {
        self.leaves
            .iter()
            .filter_map(|rev| self.revisions.get(rev))
            .max_by(|a, b| a.sort_key().cmp(&b.sort_key()))
    }

    /// Live leaves other than the winner, best first.
    pub fn conflicts(&self) -> Vec<String> {
        let winner = self.winner().map(|w| w.rev.as_str());
        let mut losers: Vec<&Revision> = self
            .leaves
            .iter()
            .filter(|rev| Some(rev.as_str()) != winner)
            .filter_map(|rev| self.revisions.get(rev))
            .filter(|r| !r.deleted)
            .collect();
        losers.sort_by_key(|r| Reverse((r.generation, r.rev.clone())));
        losers.into_iter().map(|r| r.rev.clone()).collect()
    }

    pub fn is_leaf(&self, rev: &str) -> bool {
        self.leaves.contains(rev)
    }

    pub fn get(&self, rev: &str) -> Option<&Revision> {
        self.revisions.get(rev)
    }

    pub fn contains(&self, rev: &str) -> bool {
        self.revisions.contains_key(rev)
    }

    /// Returns true when the winner is a deletion or there is no revision.
    pub fn is_deleted(&self) -> bool {
        self.winner().map_or(true, |w| w.deleted)
    }

    /// `rev` followed by its known ancestors, newest first.
    pub fn history(&self, rev: &str) -> Vec<&Revision> {
        let mut chain = Vec::new();
        let mut cursor = self.revisions.get(rev);
        while let Some(revision) = cursor {
            chain.push(revision);
            cursor = revision.parent.as_deref().and_then(|p| self.revisions.get(p));
        }
        chain
    }

    /// Adds a revision. Returns false if it was already known.
    pub fn insert(&mut self, revision: Revision) -> bool {
        if self.revisions.contains_key(&revision.rev) {
            return false;
        }
        if let Some(parent) = &revision.parent {
            self.leaves.remove(parent);
        }
        let has_child = self
            .revisions
            .values()
            .any(|r| r.parent.as_deref() == Some(revision.rev.as_str()));
        if !has_child {
            self.leaves.insert(revision.rev.clone());
        }
        self.revisions.insert(revision.rev.clone(), revision);
        true
    }

    /// Revisions of `self` that `other` lacks, ancestors first.
    pub fn missing_from(&self, other: Option<&DocTree>) -> Vec<Revision> {
        let mut missing: Vec<Revision> = self
            .revisions
            .values()
            .filter(|r| other.map_or(true, |o| !o.contains(&r.rev)))
            .cloned()
            .collect();
        missing.sort_by(|a, b| a.generation.cmp(&b.generation).then_with(|| a.rev.cmp(&b.rev)));
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(token: &str, parent: Option<&str>, deleted: bool) -> Revision {
        let (generation, _) = parse_rev(token).unwrap();
        Revision {
            rev: token.to_string(),
            generation,
            parent: parent.map(str::to_string),
            body: Document::new(),
            deleted,
        }
    }

    #[test]
    fn highest_generation_wins() {
        let mut tree = DocTree::default();
        tree.insert(rev("1-a", None, false));
        tree.insert(rev("2-b", Some("1-a"), false));
        tree.insert(rev("2-c", Some("1-a"), false));
        tree.insert(rev("3-a", Some("2-b"), false));
        assert_eq!(tree.winner().unwrap().rev, "3-a");
        assert_eq!(tree.conflicts(), vec!["2-c".to_string()]);
        assert!(!tree.is_leaf("1-a"));
    }

    #[test]
    fn live_leaf_beats_deleted_leaf() {
        let mut tree = DocTree::default();
        tree.insert(rev("1-a", None, false));
        tree.insert(rev("2-b", Some("1-a"), false));
        tree.insert(rev("3-c", Some("2-b"), true));
        tree.insert(rev("2-d", Some("1-a"), false));
        assert_eq!(tree.winner().unwrap().rev, "2-d");
        assert!(tree.conflicts().is_empty());
        assert!(!tree.is_deleted());
    }

    #[test]
    fn history_walks_to_root() {
        let mut tree = DocTree::default();
        tree.insert(rev("1-a", None, false));
        tree.insert(rev("2-b", Some("1-a"), false));
        let chain: Vec<&str> = tree.history("2-b").iter().map(|r| r.rev.as_str()).collect();
        assert_eq!(chain, ["2-b", "1-a"]);
    }

    #[test]
    fn missing_revisions_come_ancestors_first() {
        let mut source = DocTree::default();
        source.insert(rev("1-a", None, false));
        source.insert(rev("2-b", Some("1-a"), false));
        let mut target = DocTree::default();
        target.insert(rev("1-a", None, false));

        let all: Vec<String> = source.missing_from(None).into_iter().map(|r| r.rev).collect();
        assert_eq!(all, ["1-a", "2-b"]);
        let diff: Vec<String> = source
            .missing_from(Some(&target))
            .into_iter()
            .map(|r| r.rev)
            .collect();
        assert_eq!(diff, ["2-b"]);
    }

    #[test]
    fn rev_parsing() {
        assert_eq!(parse_rev("12-abc"), Some((12, "abc")));
        assert_eq!(parse_rev("abc"), None);
        assert_eq!(parse_rev("x-abc"), None);
        assert_eq!(parse_rev("1-"), None);
    }
}
