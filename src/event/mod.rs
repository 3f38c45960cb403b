//! Event Module - event sourcing for run execution
//!
//! Key types:
//! - `Event`: envelope with id + timestamp + kind
//! - `EventKind`: run, node, fix-loop and advisory signals
//! - `EventLog`: thread-safe, append-only log
//! - `EventEmitter`: trait for dependency injection
//! - `NoopEmitter`: no-op for testing
//! - `TraceWriter`: NDJSON file writer for audit and replay

mod emitter;
mod log;
mod trace;

pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
pub use trace::{list_traces, read_trace, TraceInfo, TraceWriter};
