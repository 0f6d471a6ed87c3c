//! Row selection and reduction for `all_docs` and view queries.

use crate::collate::collate;
use couchbridge_core::{Document, Options, ReduceFn, Reducer, StoreError, StoreResult};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Row-selection options read back from an option object.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowSelection {
    pub include_docs: bool,
    pub conflicts: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    pub startkey: Option<Value>,
    pub endkey: Option<Value>,
    pub inclusive_end: bool,
    pub key: Option<Value>,
    pub keys: Option<Vec<Value>>,
}

fn flag(options: &Options, name: &str) -> bool {
    options.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn count(options: &Options, name: &str) -> Option<usize> {
    options
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

impl RowSelection {
    pub fn from_options(options: &Options) -> Self {
        Self {
            include_docs: flag(options, "include_docs"),
            conflicts: flag(options, "conflicts"),
            descending: flag(options, "descending"),
            skip: count(options, "skip").unwrap_or(0),
            limit: count(options, "limit"),
            startkey: options.get("startkey").cloned(),
            endkey: options.get("endkey").cloned(),
            inclusive_end: options
                .get("inclusive_end")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            key: options.get("key").cloned(),
            keys: options.get("keys").and_then(Value::as_array).cloned(),
        }
    }

    fn after_start(&self, key: &Value) -> bool {
        let Some(start) = &self.startkey else {
            return true;
        };
        match collate(key, start) {
            Ordering::Equal => true,
            Ordering::Greater => !self.descending,
            Ordering::Less => self.descending,
        }
    }

    fn before_end(&self, key: &Value) -> bool {
        let Some(end) = &self.endkey else {
            return true;
        };
        match collate(key, end) {
            Ordering::Equal => self.inclusive_end,
            Ordering::Less => !self.descending,
            Ordering::Greater => self.descending,
        }
    }

    /// Orders `rows` (sorted ascending) and keeps those matching `key` or
    /// the start/end range. Returns the number of rows skipped before the
    /// range together with the matching rows.
    pub fn select<T>(&self, mut rows: Vec<T>, key_of: impl Fn(&T) -> &Value) -> (usize, Vec<T>) {
        if self.descending {
            rows.reverse();
        }
        if let Some(key) = &self.key {
            let before = rows
                .iter()
                .take_while(|r| collate(key_of(r), key) != Ordering::Equal)
                .count();
            rows.retain(|r| collate(key_of(r), key) == Ordering::Equal);
            return (before, rows);
        }
        let before = rows.iter().filter(|r| !self.after_start(key_of(r))).count();
        rows.retain(|r| self.after_start(key_of(r)) && self.before_end(key_of(r)));
        (before, rows)
    }

    /// Applies `skip` and `limit`.
    pub fn page<T>(&self, rows: Vec<T>) -> Vec<T> {
        let rows = rows.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

/// One emitted view row.
#[derive(Debug, Clone)]
pub(crate) struct ViewRow {
    pub key: Value,
    pub id: String,
    pub value: Value,
    pub doc: Option<Document>,
}

impl ViewRow {
    pub fn to_value(&self) -> Value {
        let mut row = serde_json::Map::new();
        if !self.id.is_empty() {
            row.insert("id".into(), Value::from(self.id.as_str()));
        }
        row.insert("key".into(), self.key.clone());
        row.insert("value".into(), self.value.clone());
        if let Some(doc) = &self.doc {
            row.insert("doc".into(), Value::Object(doc.clone()));
        }
        Value::Object(row)
    }
}

/// Sorts rows by key, then by document id.
pub(crate) fn sort_rows(rows: &mut [ViewRow]) {
    rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
}

/// The reduce step of a view.
#[derive(Clone)]
pub(crate) enum ViewReduce {
    Builtin(Reducer),
    Custom(ReduceFn),
}

/// How reduced rows are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grouping {
    All,
    Exact,
    Level(u32),
}

impl Grouping {
    pub fn from_options(options: &Options) -> Self {
        match (flag(options, "group"), options.get("group_level").and_then(Value::as_u64)) {
            (_, Some(level)) => Grouping::Level(u32::try_from(level).unwrap_or(u32::MAX)),
            (true, None) => Grouping::Exact,
            (false, None) => Grouping::All,
        }
    }

    fn group_key(self, key: &Value) -> Value {
        match (self, key) {
            (Grouping::All, _) => Value::Null,
            (Grouping::Level(level), Value::Array(parts)) => {
                Value::Array(parts.iter().take(level as usize).cloned().collect())
            }
            _ => key.clone(),
        }
    }
}

/// Reduces sorted rows into `{key, value}` rows.
pub(crate) fn reduce_rows(
    rows: &[ViewRow],
    reducer: &ViewReduce,
    grouping: Grouping,
) -> StoreResult<Vec<ViewRow>> {
    let mut groups: Vec<(Value, Vec<&ViewRow>)> = Vec::new();
    for row in rows {
        let key = grouping.group_key(&row.key);
        match groups.last_mut() {
            Some((current, members)) if collate(current, &key) == Ordering::Equal => {
                members.push(row);
            }
            _ => groups.push((key, vec![row])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let values: Vec<Value> = members.iter().map(|r| r.value.clone()).collect();
            let value = match reducer {
                ViewReduce::Builtin(builtin) => reduce_builtin(*builtin, &values)?,
                ViewReduce::Custom(reduce) => {
                    let keys: Vec<Value> =
                        members.iter().map(|r| json!([r.key, r.id])).collect();
                    reduce(&keys, &values, false)
                }
            };
            Ok(ViewRow {
                key,
                id: String::new(),
                value,
                doc: None,
            })
        })
        .collect()
}

fn numbers(reducer: Reducer, values: &[Value]) -> StoreResult<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                StoreError::new(
                    Some(500),
                    "builtin_reduce_error",
                    format!("{} requires numeric values, got {v}", reducer.as_str()),
                )
            })
        })
        .collect()
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Runs a built-in reducer.
pub(crate) fn reduce_builtin(reducer: Reducer, values: &[Value]) -> StoreResult<Value> {
    match reducer {
        Reducer::Count => Ok(json!(values.len())),
        Reducer::Sum => Ok(number(numbers(reducer, values)?.iter().sum())),
        Reducer::Stats => {
            let nums = numbers(reducer, values)?;
            let min = nums.iter().copied().fold(f64::INFINITY, f64::min);
            let max = nums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Ok(json!({
                "sum": number(nums.iter().sum()),
                "count": nums.len(),
                "min": number(min),
                "max": number(max),
                "sumsqr": number(nums.iter().map(|n| n * n).sum()),
            }))
        }
    }
}
