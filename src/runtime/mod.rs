//! Runtime Module - run execution
//!
//! Contains the runtime execution components:
//! - `runner`: run lifecycle, stage ordering, parallel groups
//! - `executor`: one skill invocation and its execution record
//! - `fix_loop`: bounded fix → compose → validate repair cycle
//! - `selector`: input selection strategies
//! - `trace`: ordered execution trace (the source of node indexes)
//! - `validation`: validator report parsing
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `ast` module.

mod executor;
mod fix_loop;
mod runner;
mod selector;
mod trace;
mod validation;

pub use executor::{NodeExecutor, RunScope};
pub use fix_loop::{FixLoop, FixLoopOutcome};
pub use runner::{Orchestrator, RunRequest, RunSummary};
pub use selector::{FieldRef, InputSelector, NodeInputs, Pick, Roles};
pub use trace::{ExecutionTrace, TraceEntry};
pub use validation::ValidationReport;
