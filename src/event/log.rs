//! EventLog - event sourcing for a run
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run, node, fix-loop and advisory levels
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::determinism::DecoderAdvisory;

/// Single event in the run's execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since log creation (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All lifecycle signals emitted by the runtime
///
/// Node fields use Arc<str> so the runtime can clone ids for free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run_id: String,
        subject_id: String,
        node_count: usize,
        base_seed: i64,
        /// Canonical hash of the manifest (provenance)
        manifest_hash: String,
        cadence_version: String,
    },
    RunCompleted {
        run_id: String,
        total_duration_ms: u64,
        fix_iterations: u32,
    },
    RunFailed {
        run_id: String,
        failed_node: Option<Arc<str>>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeStarted {
        node: Arc<str>,
        node_index: usize,
        seed: i64,
        /// Inputs selected for the skill
        inputs: Value,
    },
    NodeCompleted {
        node: Arc<str>,
        node_index: usize,
        output: Arc<Value>,
        /// `sha256:` digest of the output
        output_hash: String,
        duration_ms: u64,
    },
    NodeFailed {
        node: Arc<str>,
        node_index: usize,
        error: String,
        duration_ms: u64,
    },
    /// Condition evaluated false; no execution record exists
    NodeSkipped { node: Arc<str>, condition: String },

    // ═══════════════════════════════════════════
    // FIX LOOP
    // ═══════════════════════════════════════════
    FixLoopIteration {
        node: Arc<str>,
        iteration: u32,
        passed: bool,
    },
    FixLoopFinished {
        node: Arc<str>,
        iterations: u32,
        passed: bool,
        exhausted: bool,
    },

    // ═══════════════════════════════════════════
    // ADVISORIES
    // ═══════════════════════════════════════════
    /// Pinned hashes that no longer resolve
    RetrievalDrift { node: Arc<str>, missing: Vec<String> },
    DecoderAdvisory {
        node: Arc<str>,
        advisory: DecoderAdvisory,
    },
}

impl EventKind {
    /// Extract the node id if the event is node-scoped
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node, .. }
            | Self::NodeCompleted { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::NodeSkipped { node, .. }
            | Self::FixLoopIteration { node, .. }
            | Self::FixLoopFinished { node, .. }
            | Self::RetrievalDrift { node, .. }
            | Self::DecoderAdvisory { node, .. } => Some(node),
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        // Id allocation and push share the write lock so ids stay in log order
        let mut events = self.events.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback; holds the read lock.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    pub fn filter_node(&self, node: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.node() == Some(node))
                .cloned()
                .collect()
        })
    }

    pub fn run_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_run_event())
                .cloned()
                .collect()
        })
    }

    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
