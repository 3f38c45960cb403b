//! InMemoryRunStore - RunStore backed by DashMap
//!
//! Lock-free across runs; per-record mutation goes through DashMap's shard
//! lock, so a committed write is visible to the next read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::{CadenceError, Result};

use super::records::{NodeExecution, NodeStatus, Run, RunPatch};
use super::RunStore;

type ExecutionKey = (Arc<str>, usize);

#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<DashMap<Arc<str>, Run>>,
    executions: Arc<DashMap<ExecutionKey, NodeExecution>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn finish(
        &self,
        run_id: &str,
        node_index: usize,
        outcome: std::result::Result<Value, String>,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<NodeExecution> {
        let key: ExecutionKey = (Arc::from(run_id), node_index);
        let mut record =
            self.executions
                .get_mut(&key)
                .ok_or_else(|| CadenceError::ExecutionNotFound {
                    run_id: run_id.to_string(),
                    node_index,
                })?;

        if record.is_terminal() {
            return Err(CadenceError::RecordConflict {
                reason: format!(
                    "execution {} of run '{}' is already {:?}",
                    node_index, run_id, record.status
                ),
            });
        }

        match outcome {
            Ok(outputs) => {
                record.status = NodeStatus::Completed;
                record.outputs = Some(outputs);
            }
            Err(error) => {
                record.status = NodeStatus::Failed;
                record.error = Some(error);
            }
        }
        record.ended_at = Some(ended_at);
        record.duration_ms = Some(duration_ms);
        Ok(record.clone())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: Run) -> Result<()> {
        match self.runs.entry(Arc::from(run.id.as_str())) {
            Entry::Occupied(_) => Err(CadenceError::RecordConflict {
                reason: format!("run '{}' already exists", run.id),
            }),
            Entry::Vacant(slot) => {
                slot.insert(run);
                Ok(())
            }
        }
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.runs
            .get(run_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CadenceError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<Run> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| CadenceError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        if run.status.is_terminal() {
            return Err(CadenceError::RecordConflict {
                reason: format!("run '{}' is already {}", run_id, run.status),
            });
        }

        run.apply(patch);
        Ok(run.clone())
    }

    async fn create_execution(&self, execution: NodeExecution) -> Result<()> {
        let key: ExecutionKey = (Arc::from(execution.run_id.as_str()), execution.node_index);
        match self.executions.entry(key) {
            Entry::Occupied(_) => Err(CadenceError::RecordConflict {
                reason: format!(
                    "execution {} of run '{}' already exists",
                    execution.node_index, execution.run_id
                ),
            }),
            Entry::Vacant(slot) => {
                slot.insert(execution);
                Ok(())
            }
        }
    }

    async fn complete_execution(
        &self,
        run_id: &str,
        node_index: usize,
        outputs: Value,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<NodeExecution> {
        self.finish(run_id, node_index, Ok(outputs), ended_at, duration_ms)
    }

    async fn fail_execution(
        &self,
        run_id: &str,
        node_index: usize,
        error: String,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<NodeExecution> {
        self.finish(run_id, node_index, Err(error), ended_at, duration_ms)
    }

    async fn get_execution(&self, run_id: &str, node_index: usize) -> Result<NodeExecution> {
        let key: ExecutionKey = (Arc::from(run_id), node_index);
        self.executions
            .get(&key)
            .map(|r| r.value().clone())
            .ok_or_else(|| CadenceError::ExecutionNotFound {
                run_id: run_id.to_string(),
                node_index,
            })
    }

    async fn executions(&self, run_id: &str) -> Result<Vec<NodeExecution>> {
        let mut records: Vec<NodeExecution> = self
            .executions
            .iter()
            .filter(|entry| &*entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.node_index);
        Ok(records)
    }
}

impl std::fmt::Debug for InMemoryRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRunStore")
            .field("runs", &self.runs.len())
            .field("executions", &self.executions.len())
            .finish()
    }
}
