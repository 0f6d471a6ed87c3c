//! View functions passed to `query`.
//!
//! Map and reduce functions are pre-compiled closures supplied by the host
//! application. Nothing here evaluates source text.

use crate::types::Document;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Map function: emits `(key, value)` pairs for a document.
pub type MapFn = Arc<dyn Fn(&Document) -> Vec<(Value, Value)> + Send + Sync>;

/// Reduce function: `(keys, values, rereduce) -> reduced value`.
pub type ReduceFn = Arc<dyn Fn(&[Value], &[Value], bool) -> Value + Send + Sync>;

/// The view a query runs against.
#[derive(Clone)]
pub enum ViewFunction {
    /// A view stored in a design document, as `ddoc/view`.
    Named(String),
    /// A temporary map-only view.
    Map(MapFn),
    /// A temporary map/reduce view.
    MapReduce {
        /// Map step.
        map: MapFn,
        /// Reduce step.
        reduce: ReduceFn,
    },
}

impl ViewFunction {
    /// A persisted view.
    pub fn named(name: impl Into<String>) -> Self {
        ViewFunction::Named(name.into())
    }

    /// A temporary map-only view.
    pub fn map<F>(map: F) -> Self
    where
        F: Fn(&Document) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        ViewFunction::Map(Arc::new(map))
    }

    /// A temporary map/reduce view.
    pub fn map_reduce<M, R>(map: M, reduce: R) -> Self
    where
        M: Fn(&Document) -> Vec<(Value, Value)> + Send + Sync + 'static,
        R: Fn(&[Value], &[Value], bool) -> Value + Send + Sync + 'static,
    {
        ViewFunction::MapReduce {
            map: Arc::new(map),
            reduce: Arc::new(reduce),
        }
    }

    /// View name for persisted views.
    pub fn name(&self) -> Option<&str> {
        match self {
            ViewFunction::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for ViewFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewFunction::Named(name) => f.debug_tuple("Named").field(name).finish(),
            ViewFunction::Map(_) => f.write_str("Map(<fn>)"),
            ViewFunction::MapReduce { .. } => f.write_str("MapReduce(<fn>, <fn>)"),
        }
    }
}
