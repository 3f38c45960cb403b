//! Store Module - run and execution persistence
//!
//! The orchestrator is the only writer of `Run` records; the executor is the
//! only writer of `NodeExecution` records. Storage technology is pluggable
//! through `RunStore`.
//!
//! Key types:
//! - `RunStore`: async persistence collaborator
//! - `Run` / `RunPatch` / `RunStatus`: run lifecycle record
//! - `NodeExecution` / `NodeStatus`: append-only node invocation record
//! - `InMemoryRunStore`: DashMap-backed implementation

mod memory;
mod records;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

pub use memory::InMemoryRunStore;
pub use records::{NodeExecution, NodeStatus, Run, RunError, RunPatch, RunStatus};

/// Persistence collaborator for runs and node executions
///
/// Implementations must tolerate concurrent use by many runs and give
/// read-after-write visibility within a run.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Run>;

    /// Field-level update; fails once the run is terminal
    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<Run>;

    /// Insert a `running` record; `(run_id, node_index)` must be unique
    async fn create_execution(&self, execution: NodeExecution) -> Result<()>;

    async fn complete_execution(
        &self,
        run_id: &str,
        node_index: usize,
        outputs: Value,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<NodeExecution>;

    async fn fail_execution(
        &self,
        run_id: &str,
        node_index: usize,
        error: String,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<NodeExecution>;

    async fn get_execution(&self, run_id: &str, node_index: usize) -> Result<NodeExecution>;

    /// All executions of a run, ordered by node index
    async fn executions(&self, run_id: &str) -> Result<Vec<NodeExecution>>;
}
