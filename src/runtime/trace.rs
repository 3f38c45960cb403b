//! ExecutionTrace - ordered record of what a run has produced
//!
//! Entry `i` is the output of the execution with node index `i`; the next
//! seed is derived from the trace length, never from hidden state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub index: usize,
    pub node: Arc<str>,
    pub output: Arc<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    entries: Vec<TraceEntry>,
    /// node id -> position of its most recent entry
    latest: HashMap<Arc<str>, usize>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next execution will receive
    pub fn next_index(&self) -> usize {
        self.entries.len()
    }

    /// Append an output and return its index
    pub fn push(&mut self, node: Arc<str>, output: Arc<Value>) -> usize {
        let index = self.entries.len();
        self.latest.insert(Arc::clone(&node), index);
        self.entries.push(TraceEntry {
            index,
            node,
            output,
        });
        index
    }

    /// Most recent output of `node` (repairs shadow earlier outputs)
    pub fn latest(&self, node: &str) -> Option<&Arc<Value>> {
        self.latest.get(node).map(|&i| &self.entries[i].output)
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest output per node, keyed by node id
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.latest
            .iter()
            .map(|(node, &i)| (node.to_string(), (*self.entries[i].output).clone()))
            .collect()
    }
}
