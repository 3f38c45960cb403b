//! Orchestrator - run lifecycle
//!
//! Walks the manifest's stages strictly in declared order:
//! - conditions are evaluated against the last validation and the flags
//! - single nodes run through the `NodeExecutor`
//! - fix-loop nodes hand control to the `FixLoop`
//! - parallel groups run as a `JoinSet`, indexes reserved in declared order
//!
//! A run ends `completed` or `failed`, never in between. Any node error halts
//! the run, is recorded with the node id and a timestamp, and is returned
//! wrapped once in `CadenceError::Orchestration`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::ast::{FeatureFlags, Manifest, NodeSpec, Stage};
use crate::config::{EngineConfig, FixExhaustionPolicy};
use crate::determinism::{validate_decoder_settings_with, DecoderAdvisory};
use crate::error::{CadenceError, Result};
use crate::event::{EventEmitter, EventKind};
use crate::skill::SkillRegistry;
use crate::store::{Run, RunError, RunPatch, RunStatus, RunStore};

use super::executor::{NodeExecutor, RunScope};
use super::fix_loop::FixLoop;
use super::selector::{NodeInputs, Roles};
use super::trace::ExecutionTrace;
use super::validation::ValidationReport;

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Generated (UUID v4) when absent
    pub run_id: Option<String>,
    pub subject_id: String,
    pub base_seed: i64,
    /// JSON object, addressable as the `input` pseudo-node
    pub inputs: Value,
    /// Merged over the configured flags
    pub flags: FeatureFlags,
    /// Clock value skills observe through `ExecutionContext::now`
    pub epoch: DateTime<Utc>,
    /// Overrides the configured policy
    pub on_fix_exhausted: Option<FixExhaustionPolicy>,
}

impl RunRequest {
    pub fn new(subject_id: impl Into<String>, base_seed: i64) -> Self {
        Self {
            run_id: None,
            subject_id: subject_id.into(),
            base_seed,
            inputs: Value::Object(Map::new()),
            flags: FeatureFlags::new(),
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            on_fix_exhausted: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    pub fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: FixExhaustionPolicy) -> Self {
        self.on_fix_exhausted = Some(policy);
        self
    }
}

/// Aggregate result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub subject_id: String,
    pub status: RunStatus,
    pub manifest_hash: String,
    pub duration_ms: u64,
    pub fix_iterations: u32,
    /// The fix loop hit its bound without a pass (policy `complete`)
    pub fix_exhausted: bool,
    pub validation: Option<ValidationReport>,
    /// Latest output per executed node
    pub outputs: BTreeMap<String, Value>,
    /// Number of node executions (and execution records)
    pub executed: usize,
}

impl RunSummary {
    pub fn scores(&self) -> Option<&Map<String, Value>> {
        self.validation.as_ref().map(|v| &v.scores)
    }
}

#[derive(Default)]
struct RunState {
    trace: ExecutionTrace,
    last_validation: Option<ValidationReport>,
    fix_iterations: u32,
    fix_exhausted: bool,
    current_node: Option<Arc<str>>,
}

/// Owns the run lifecycle; one instance serves many concurrent runs
pub struct Orchestrator {
    executor: NodeExecutor,
    store: Arc<dyn RunStore>,
    events: Arc<dyn EventEmitter>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        registry: SkillRegistry,
        store: Arc<dyn RunStore>,
        events: Arc<dyn EventEmitter>,
        config: EngineConfig,
    ) -> Self {
        let executor = NodeExecutor::new(Arc::new(registry), Arc::clone(&store), Arc::clone(&events));
        Self {
            executor,
            store,
            events,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Execute one run to completion
    pub async fn run(&self, manifest: &Manifest, request: RunRequest) -> Result<RunSummary> {
        self.run_with_cancel(manifest, request, CancellationToken::new())
            .await
    }

    /// Execute one run; cancelling `cancel` fails the in-flight node and the run
    #[instrument(
        name = "run",
        skip_all,
        fields(
            subject = %request.subject_id,
            base_seed = request.base_seed,
            run_id = tracing::field::Empty
        )
    )]
    pub async fn run_with_cancel(
        &self,
        manifest: &Manifest,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        if request.base_seed < 0 {
            return Err(CadenceError::InvalidArgument {
                reason: format!("base_seed must be >= 0, got {}", request.base_seed),
            });
        }
        let inputs = match request.inputs {
            Value::Object(map) => map,
            Value::Null => NodeInputs::new(),
            other => {
                return Err(CadenceError::InvalidArgument {
                    reason: format!("run inputs must be a JSON object, got {}", other),
                })
            }
        };
        let advisories = self.decoder_advisories(manifest)?;

        let run_id: Arc<str> = request
            .run_id
            .map(Arc::from)
            .unwrap_or_else(|| Arc::from(Uuid::new_v4().to_string()));
        Span::current().record("run_id", &*run_id);

        let mut flags = self.config.flags.clone();
        flags.extend(request.flags);
        let policy = request
            .on_fix_exhausted
            .unwrap_or(self.config.on_fix_exhausted);

        self.store
            .create_run(Run::new(
                &*run_id,
                request.subject_id.as_str(),
                request.base_seed,
                manifest.content_hash(),
            ))
            .await?;
        self.store
            .update_run(&run_id, RunPatch::new().status(RunStatus::Running))
            .await?;

        self.events.emit(EventKind::RunStarted {
            run_id: run_id.to_string(),
            subject_id: request.subject_id.clone(),
            node_count: manifest.len(),
            base_seed: request.base_seed,
            manifest_hash: manifest.content_hash().to_string(),
            cadence_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        info!(nodes = manifest.len(), "run started");

        for (node, advisory) in advisories {
            warn!(node = %node, %advisory, "decoder advisory");
            self.events
                .emit(EventKind::DecoderAdvisory { node, advisory });
        }

        let scope = RunScope {
            run_id,
            subject_id: Arc::from(request.subject_id),
            base_seed: request.base_seed,
            inputs: Arc::new(inputs),
            flags,
            roles: Arc::new(Roles::from_manifest(manifest)),
            epoch: request.epoch,
            cancel,
        };
        let mut state = RunState::default();

        if let Err(err) = self.drive(manifest, &scope, policy, &mut state).await {
            return Err(self.fail(&scope, &state, err).await);
        }

        let mut patch = RunPatch::new()
            .status(RunStatus::Completed)
            .fix_iterations(state.fix_iterations);
        if let Some(report) = &state.last_validation {
            patch = patch.last_validation(report.raw.clone());
        }
        if let Err(err) = self.store.update_run(&scope.run_id, patch).await {
            return Err(self.fail(&scope, &state, err).await);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        self.events.emit(EventKind::RunCompleted {
            run_id: scope.run_id.to_string(),
            total_duration_ms: duration_ms,
            fix_iterations: state.fix_iterations,
        });
        info!(
            duration_ms,
            executed = state.trace.len(),
            fix_iterations = state.fix_iterations,
            "run completed"
        );

        Ok(RunSummary {
            run_id: scope.run_id.to_string(),
            subject_id: scope.subject_id.to_string(),
            status: RunStatus::Completed,
            manifest_hash: manifest.content_hash().to_string(),
            duration_ms,
            fix_iterations: state.fix_iterations,
            fix_exhausted: state.fix_exhausted,
            outputs: state.trace.outputs(),
            executed: state.trace.len(),
            validation: state.last_validation,
        })
    }

    async fn drive(
        &self,
        manifest: &Manifest,
        scope: &RunScope,
        policy: FixExhaustionPolicy,
        state: &mut RunState,
    ) -> Result<()> {
        for stage in manifest.stages() {
            match stage {
                Stage::Single(node) => self.run_node(manifest, scope, policy, &node, state).await?,
                Stage::Parallel { group, nodes } => {
                    self.run_parallel(scope, &group, &nodes, state).await?
                }
            }
        }
        Ok(())
    }

    /// Condition check; emits `NodeSkipped` when the gate is closed
    fn gate(&self, node: &NodeSpec, scope: &RunScope, state: &RunState) -> bool {
        let Some(condition) = &node.condition else {
            return true;
        };
        let last_pass = state.last_validation.as_ref().map(|r| r.pass);
        if condition.evaluate(last_pass, &scope.flags) {
            return true;
        }
        info!(node = %node.id, %condition, "node skipped");
        self.events.emit(EventKind::NodeSkipped {
            node: Arc::clone(&node.id),
            condition: condition.to_string(),
        });
        false
    }

    async fn enter(&self, scope: &RunScope, state: &mut RunState, node: &Arc<str>) -> Result<()> {
        state.current_node = Some(Arc::clone(node));
        self.store
            .update_run(&scope.run_id, RunPatch::new().current_node(&**node))
            .await?;
        Ok(())
    }

    async fn run_node(
        &self,
        manifest: &Manifest,
        scope: &RunScope,
        policy: FixExhaustionPolicy,
        node: &NodeSpec,
        state: &mut RunState,
    ) -> Result<()> {
        if !self.gate(node, scope, state) {
            return Ok(());
        }
        self.enter(scope, state, &node.id).await?;

        let Some(fix_loop) = &node.fix_loop else {
            let output = self.executor.run_next(scope, node, &mut state.trace).await?;
            if node.id == manifest.validator {
                let report = ValidationReport::from_output(&node.id, &output)?;
                debug!(passed = report.pass, "validation recorded");
                self.store
                    .update_run(
                        &scope.run_id,
                        RunPatch::new().last_validation(report.raw.clone()),
                    )
                    .await?;
                state.last_validation = Some(report);
            }
            return Ok(());
        };

        let missing = |id: &str| CadenceError::InvalidManifest {
            reason: format!("fix loop on '{}' references unknown node '{}'", node.id, id),
        };
        let compose = manifest
            .node(&fix_loop.compose)
            .ok_or_else(|| missing(&*fix_loop.compose))?;
        let validate = manifest
            .node(&manifest.validator)
            .ok_or_else(|| missing(&*manifest.validator))?;
        let max = node.max_retries.unwrap_or(self.config.max_fix_iterations);

        let outcome = FixLoop::new(&self.executor, node, compose, validate, max)
            .run(scope, &mut state.trace, state.last_validation.clone())
            .await?;

        state.fix_iterations += outcome.iterations;
        state.fix_exhausted |= outcome.exhausted;
        if let Some(report) = outcome.last_validation {
            state.last_validation = Some(report);
        }

        let mut patch = RunPatch::new().fix_iterations(state.fix_iterations);
        if let Some(report) = &state.last_validation {
            patch = patch.last_validation(report.raw.clone());
        }
        self.store.update_run(&scope.run_id, patch).await?;

        if outcome.exhausted && policy == FixExhaustionPolicy::Fail {
            state.current_node = Some(Arc::clone(&node.id));
            return Err(CadenceError::FixLoopExhausted {
                iterations: outcome.iterations,
            });
        }
        Ok(())
    }

    /// Run a parallel group; commit outputs in declared order
    async fn run_parallel(
        &self,
        scope: &RunScope,
        group: &str,
        nodes: &[Arc<NodeSpec>],
        state: &mut RunState,
    ) -> Result<()> {
        let ready: Vec<&Arc<NodeSpec>> = nodes
            .iter()
            .filter(|node| self.gate(node, scope, state))
            .collect();
        let Some(first) = ready.first() else {
            return Ok(());
        };
        self.enter(scope, state, &first.id).await?;

        // Inputs for every member come from the trace as it stood before the group
        let mut prepared = Vec::with_capacity(ready.len());
        for node in &ready {
            let inputs = self
                .executor
                .select_inputs(scope, node, &state.trace)?;
            prepared.push((Arc::clone(node), inputs));
        }

        let base = state.trace.next_index();
        let siblings = scope.cancel.child_token();
        let group_scope = scope.with_cancel(siblings.clone());
        info!(group, members = ready.len(), base_index = base, "parallel stage started");

        let mut set = JoinSet::new();
        for (offset, (node, inputs)) in prepared.into_iter().enumerate() {
            let executor = self.executor.clone();
            let scope = group_scope.clone();
            set.spawn(async move {
                let result = executor.execute(&scope, &node, base + offset, inputs).await;
                (offset, result)
            });
        }

        let mut outputs: Vec<Option<Arc<Value>>> = vec![None; ready.len()];
        let mut failure: Option<(Option<usize>, CadenceError)> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((offset, Ok(output))) => outputs[offset] = Some(output),
                Ok((offset, Err(err))) => {
                    siblings.cancel();
                    if failure.is_none() {
                        failure = Some((Some(offset), err));
                    }
                }
                Err(join_err) => {
                    siblings.cancel();
                    if failure.is_none() {
                        failure = Some((
                            None,
                            CadenceError::TaskPanicked {
                                reason: join_err.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        if let Some((offset, err)) = failure {
            if let Some(offset) = offset {
                state.current_node = Some(Arc::clone(&ready[offset].id));
            }
            return Err(err);
        }

        for (node, output) in ready.iter().zip(outputs) {
            let output = output.ok_or_else(|| CadenceError::TaskPanicked {
                reason: format!("no output collected for '{}'", node.id),
            })?;
            state.trace.push(Arc::clone(&node.id), output);
        }
        Ok(())
    }

    /// Record the failure on the run and wrap the cause
    async fn fail(&self, scope: &RunScope, state: &RunState, err: CadenceError) -> CadenceError {
        let node = err
            .node()
            .map(str::to_string)
            .or_else(|| state.current_node.as_deref().map(str::to_string))
            .unwrap_or_else(|| "<run>".to_string());
        let at = Utc::now();
        let message = err.to_string();
        error!(node = %node, error = %message, "run failed");

        let mut patch = RunPatch::new()
            .status(RunStatus::Failed)
            .current_node(node.as_str())
            .fix_iterations(state.fix_iterations)
            .error(RunError {
                node: node.clone(),
                message: message.clone(),
                at,
            });
        if let Some(report) = &state.last_validation {
            patch = patch.last_validation(report.raw.clone());
        }

        self.events.emit(EventKind::RunFailed {
            run_id: scope.run_id.to_string(),
            failed_node: Some(Arc::from(node.as_str())),
            error: message,
        });

        let cause = match self.store.update_run(&scope.run_id, patch).await {
            Ok(_) => err,
            Err(store_err) => {
                error!(error = %store_err, cause = %err, "could not record run failure");
                store_err
            }
        };

        CadenceError::Orchestration {
            run_id: scope.run_id.to_string(),
            node,
            at,
            source: Box::new(cause),
        }
    }

    fn decoder_advisories(&self, manifest: &Manifest) -> Result<Vec<(Arc<str>, DecoderAdvisory)>> {
        let mut advisories = Vec::new();
        for node in manifest.nodes() {
            if let Some(decoder) = &node.decoder {
                for advisory in
                    validate_decoder_settings_with(decoder, self.config.reproducibility_temperature)?
                {
                    advisories.push((Arc::clone(&node.id), advisory));
                }
            }
        }
        Ok(advisories)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;
    use crate::skill::{skill_fn, ExecutionContext};
    use crate::store::{InMemoryRunStore, NodeStatus};
    use serde_json::json;

    const PIPELINE: &str = r#"
schema: cadence/manifest@1
nodes:
  - id: plan
    inputs: [input]
  - id: compose
    inputs: [plan]
  - id: validate
  - id: fix
    condition: validation.failed
    fix_loop: {}
  - id: render
    inputs: [compose]
    condition: validation.passed && flags.render
"#;

    fn registry(validator_passes: bool) -> SkillRegistry {
        let mut registry = SkillRegistry::new();
        registry
            .register(
                "plan",
                skill_fn(|inputs: NodeInputs, ctx: ExecutionContext| async move {
                    Ok(json!({"title": inputs["input"]["title"], "seed": ctx.seed}))
                }),
            )
            .register(
                "compose",
                skill_fn(|_, ctx: ExecutionContext| async move { Ok(json!({"take": ctx.seed})) }),
            )
            .register(
                "validate",
                skill_fn(move |_, _| async move {
                    Ok(json!({"pass": validator_passes, "scores": {"overall": 0.5}}))
                }),
            )
            .register("fix", skill_fn(|_, _| async { Ok(json!({})) }))
            .register("render", skill_fn(|_, _| async { Ok(json!({"wav": true})) }));
        registry
    }

    fn orchestrator(registry: SkillRegistry) -> (Orchestrator, InMemoryRunStore, EventLog) {
        let store = InMemoryRunStore::new();
        let log = EventLog::new();
        let orch = Orchestrator::new(
            registry,
            Arc::new(store.clone()),
            Arc::new(log.clone()),
            EngineConfig::default(),
        );
        (orch, store, log)
    }

    #[tokio::test]
    async fn passing_run_skips_fix_and_gates_render_on_flag() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let (orch, store, log) = orchestrator(registry(true));

        let summary = orch
            .run(
                &manifest,
                RunRequest::new("song-1", 42).with_inputs(json!({"title": "Neon"})),
            )
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.fix_iterations, 0);
        assert_eq!(summary.outputs["plan"], json!({"title": "Neon", "seed": 43}));
        assert!(!summary.outputs.contains_key("render"));
        assert_eq!(summary.scores().unwrap()["overall"], json!(0.5));

        let skipped = log
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NodeSkipped { .. }))
            .count();
        assert_eq!(skipped, 2);

        let run = store.get_run(&summary.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.last_validation.is_some());
    }

    #[tokio::test]
    async fn flag_opens_render_gate() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let (orch, _store, _log) = orchestrator(registry(true));

        let summary = orch
            .run(&manifest, RunRequest::new("song-1", 0).with_flag("render", true))
            .await
            .unwrap();
        assert_eq!(summary.outputs["render"], json!({"wav": true}));
        assert_eq!(summary.executed, 4);
    }

    #[tokio::test]
    async fn exhaustion_policy_fail_fails_the_run() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let (orch, store, _log) = orchestrator(registry(false));

        let err = orch
            .run(
                &manifest,
                RunRequest::new("song-1", 7)
                    .with_run_id("run-x")
                    .with_exhaustion_policy(FixExhaustionPolicy::Fail),
            )
            .await
            .unwrap_err();

        match &err {
            CadenceError::Orchestration { node, source, .. } => {
                assert_eq!(node, "fix");
                assert!(matches!(**source, CadenceError::FixLoopExhausted { iterations: 3 }));
            }
            other => panic!("unexpected {:?}", other),
        }
        let run = store.get_run("run-x").await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.fix_iterations, 3);
        assert_eq!(run.error.unwrap().node, "fix");
    }

    #[tokio::test]
    async fn exhaustion_policy_complete_keeps_legacy_behaviour() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let (orch, store, _log) = orchestrator(registry(false));

        let summary = orch.run(&manifest, RunRequest::new("song-1", 7)).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.fix_iterations, 3);
        assert!(summary.fix_exhausted);
        assert!(!summary.validation.as_ref().unwrap().pass);
        // plan, compose, validate + 3 * (fix, compose, validate)
        assert_eq!(summary.executed, 12);
        assert_eq!(store.executions(&summary.run_id).await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn rejects_negative_seed_and_non_object_inputs() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let (orch, store, _log) = orchestrator(registry(true));

        let err = orch.run(&manifest, RunRequest::new("s", -1)).await.unwrap_err();
        assert!(matches!(err, CadenceError::InvalidArgument { .. }));

        let err = orch
            .run(&manifest, RunRequest::new("s", 1).with_inputs(json!([1, 2])))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::InvalidArgument { .. }));
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn invalid_validation_report_fails_run() {
        let manifest = Manifest::from_yaml(PIPELINE).unwrap();
        let mut registry = registry(true);
        registry.register("validate", skill_fn(|_, _| async { Ok(json!({"ok": 1})) }));
        let (orch, store, _log) = orchestrator(registry);

        let err = orch
            .run(&manifest, RunRequest::new("s", 1).with_run_id("bad-report"))
            .await
            .unwrap_err();
        assert_eq!(err.node(), Some("validate"));

        let records = store.executions("bad-report").await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == NodeStatus::Completed));
        assert_eq!(
            store.get_run("bad-report").await.unwrap().status,
            RunStatus::Failed
        );
    }
}
