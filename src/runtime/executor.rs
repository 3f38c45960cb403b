//! Node Executor - one skill invocation, one execution record
//!
//! For every invocation:
//! 1. derive the seed from the run's base seed and the node index
//! 2. persist a `running` record with the selected inputs
//! 3. run the skill (isolated task, raced against cancellation)
//! 4. commit `completed` or `failed`, then return or re-raise
//!
//! The executor never swallows a failure and never leaves a record in
//! `running` once the skill has returned, panicked or been cancelled.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::ast::{FeatureFlags, NodeSpec};
use crate::determinism::{derive_seed, hash_artifact};
use crate::error::{CadenceError, Result};
use crate::event::{EventEmitter, EventKind};
use crate::skill::{ExecutionContext, SkillRegistry};
use crate::store::{NodeExecution, RunStore};

use super::selector::{NodeInputs, Roles};
use super::trace::ExecutionTrace;

/// Per-run values shared by every node invocation
#[derive(Debug, Clone)]
pub struct RunScope {
    pub run_id: Arc<str>,
    pub subject_id: Arc<str>,
    pub base_seed: i64,
    /// Run inputs, addressable as the `input` pseudo-node
    pub inputs: Arc<NodeInputs>,
    pub flags: FeatureFlags,
    /// Manifest node ids behind the selector roles
    pub roles: Arc<Roles>,
    /// Deterministic clock handed to skills
    pub epoch: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl RunScope {
    /// Same run, different cancellation token (parallel stages)
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

/// Invokes registered skills and records their executions
#[derive(Clone)]
pub struct NodeExecutor {
    registry: Arc<SkillRegistry>,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventEmitter>,
}

impl NodeExecutor {
    pub fn new(
        registry: Arc<SkillRegistry>,
        store: Arc<dyn RunStore>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            registry,
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<dyn EventEmitter> {
        &self.events
    }

    /// Build a node's inputs with the selector it was registered with
    pub fn select_inputs(
        &self,
        scope: &RunScope,
        node: &NodeSpec,
        trace: &ExecutionTrace,
    ) -> Result<NodeInputs> {
        let registered = self
            .registry
            .get(&node.id)
            .ok_or_else(|| CadenceError::SkillNotRegistered {
                node: node.id.to_string(),
            })?;
        Ok(registered
            .selector
            .select(node, trace, &scope.inputs, &scope.roles))
    }

    /// Select inputs, execute at the next trace index, append the output.
    pub async fn run_next(
        &self,
        scope: &RunScope,
        node: &NodeSpec,
        trace: &mut ExecutionTrace,
    ) -> Result<Arc<Value>> {
        let inputs = self.select_inputs(scope, node, trace)?;
        let output = self.execute(scope, node, trace.next_index(), inputs).await?;
        trace.push(Arc::clone(&node.id), Arc::clone(&output));
        Ok(output)
    }

    /// Execute `node` exactly once at `node_index`.
    #[instrument(name = "execute", skip_all, fields(node = %node.id, node_index = node_index))]
    pub async fn execute(
        &self,
        scope: &RunScope,
        node: &NodeSpec,
        node_index: usize,
        inputs: NodeInputs,
    ) -> Result<Arc<Value>> {
        let registered = self
            .registry
            .get(&node.id)
            .ok_or_else(|| CadenceError::SkillNotRegistered {
                node: node.id.to_string(),
            })?;

        if scope.cancel.is_cancelled() {
            return Err(CadenceError::Cancelled {
                node: node.id.to_string(),
            });
        }

        let index = i64::try_from(node_index).map_err(|_| CadenceError::InvalidArgument {
            reason: format!("node_index {} out of range", node_index),
        })?;
        let seed = derive_seed(scope.base_seed, index.saturating_add(1))?;

        let inputs_value = Value::Object(inputs.clone());
        self.store
            .create_execution(NodeExecution::start(
                &*scope.run_id,
                &*node.id,
                node_index,
                seed,
                inputs_value.clone(),
            ))
            .await?;
        self.events.emit(EventKind::NodeStarted {
            node: Arc::clone(&node.id),
            node_index,
            seed,
            inputs: inputs_value,
        });
        info!(seed, "node started");

        let ctx = ExecutionContext {
            run_id: Arc::clone(&scope.run_id),
            subject_id: Arc::clone(&scope.subject_id),
            seed,
            node_index,
            node: Arc::clone(&node.id),
            decoder: node.decoder,
            epoch: scope.epoch,
            events: Arc::clone(&self.events),
            store: Arc::clone(&self.store),
            cancel: scope.cancel.clone(),
        };

        let start = Instant::now();
        let skill = Arc::clone(&registered.skill);
        let mut handle = tokio::spawn(async move { skill.run(inputs, ctx).await });

        let outcome = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => {
                handle.abort();
                Err(CadenceError::Cancelled { node: node.id.to_string() })
            }
            joined = &mut handle => match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(CadenceError::SkillFailed {
                    node: node.id.to_string(),
                    reason: format!("{:#}", e),
                }),
                Err(join_err) => Err(CadenceError::SkillFailed {
                    node: node.id.to_string(),
                    reason: if join_err.is_panic() {
                        "skill panicked".to_string()
                    } else {
                        "skill task was aborted".to_string()
                    },
                }),
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let ended_at = Utc::now();

        match outcome {
            Ok(output) => {
                self.store
                    .complete_execution(&scope.run_id, node_index, output.clone(), ended_at, duration_ms)
                    .await?;
                let output = Arc::new(output);
                self.events.emit(EventKind::NodeCompleted {
                    node: Arc::clone(&node.id),
                    node_index,
                    output_hash: hash_artifact(&*output),
                    output: Arc::clone(&output),
                    duration_ms,
                });
                info!(duration_ms, "node completed");
                Ok(output)
            }
            Err(err) => {
                let message = err.to_string();
                self.store
                    .fail_execution(&scope.run_id, node_index, message.clone(), ended_at, duration_ms)
                    .await?;
                self.events.emit(EventKind::NodeFailed {
                    node: Arc::clone(&node.id),
                    node_index,
                    error: message,
                    duration_ms,
                });
                warn!(error = %err, "node failed");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("registry", &self.registry)
            .finish()
    }
}
