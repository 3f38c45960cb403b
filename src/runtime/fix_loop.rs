//! Fix Loop - bounded repair subgraph
//!
//! ```text
//! CheckValidation --pass--> Exit(passed)
//! CheckValidation --fail--> Fix -> Compose -> Validate -> CheckValidation
//! CheckValidation --iterations == max--> Exit(exhausted)
//! ```
//!
//! Each sub-node execution takes the next trace index, so seeds never repeat
//! across iterations. Execution errors are never retried; only a reported
//! `pass: false` is.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::ast::NodeSpec;
use crate::error::Result;
use crate::event::EventKind;
use crate::store::RunPatch;

use super::executor::{NodeExecutor, RunScope};
use super::trace::ExecutionTrace;
use super::validation::ValidationReport;

#[derive(Debug, Clone, PartialEq)]
pub struct FixLoopOutcome {
    pub iterations: u32,
    pub last_validation: Option<ValidationReport>,
    pub passed: bool,
    /// Stopped at the iteration bound without a passing validation
    pub exhausted: bool,
}

pub struct FixLoop<'a> {
    executor: &'a NodeExecutor,
    fix: &'a NodeSpec,
    compose: &'a NodeSpec,
    validate: &'a NodeSpec,
    max_iterations: u32,
}

impl<'a> FixLoop<'a> {
    pub fn new(
        executor: &'a NodeExecutor,
        fix: &'a NodeSpec,
        compose: &'a NodeSpec,
        validate: &'a NodeSpec,
        max_iterations: u32,
    ) -> Self {
        Self {
            executor,
            fix,
            compose,
            validate,
            max_iterations,
        }
    }

    #[instrument(name = "fix_loop", skip_all, fields(node = %self.fix.id, max = self.max_iterations))]
    pub async fn run(
        &self,
        scope: &RunScope,
        trace: &mut ExecutionTrace,
        initial: Option<ValidationReport>,
    ) -> Result<FixLoopOutcome> {
        let mut last = initial;
        let mut iterations = 0u32;

        loop {
            if last.as_ref().is_some_and(|report| report.pass) {
                break;
            }
            if iterations >= self.max_iterations {
                break;
            }
            iterations += 1;

            for node in [self.fix, self.compose] {
                self.enter(scope, node).await?;
                self.executor.run_next(scope, node, trace).await?;
            }
            self.enter(scope, self.validate).await?;
            let output = self.executor.run_next(scope, self.validate, trace).await?;
            let report = ValidationReport::from_output(&self.validate.id, &output)?;

            info!(iteration = iterations, passed = report.pass, "fix loop iteration");
            self.executor.events().emit(EventKind::FixLoopIteration {
                node: Arc::clone(&self.fix.id),
                iteration: iterations,
                passed: report.pass,
            });
            last = Some(report);
        }

        let passed = last.as_ref().is_some_and(|report| report.pass);
        let exhausted = !passed && iterations >= self.max_iterations;
        if exhausted {
            warn!(iterations, "fix loop exhausted without a passing validation");
        }
        self.executor.events().emit(EventKind::FixLoopFinished {
            node: Arc::clone(&self.fix.id),
            iterations,
            passed,
            exhausted,
        });

        Ok(FixLoopOutcome {
            iterations,
            last_validation: last,
            passed,
            exhausted,
        })
    }

    /// Move the run's current-node pointer
    async fn enter(&self, scope: &RunScope, node: &NodeSpec) -> Result<()> {
        self.executor
            .store()
            .update_run(&scope.run_id, RunPatch::new().current_node(&*node.id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FeatureFlags, Manifest};
    use crate::error::CadenceError;
    use crate::event::EventLog;
    use crate::runtime::{InputSelector, NodeInputs, Roles};
    use crate::skill::{skill_fn, ExecutionContext, SkillRegistry};
    use crate::store::{InMemoryRunStore, Run, RunStatus, RunStore};
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    const MANIFEST: &str = r#"
schema: cadence/manifest@1
nodes:
  - id: compose
  - id: validate
  - id: fix
    fix_loop: {}
"#;

    /// Validator passing on its `pass_on`-th call (0 = never)
    fn registry(pass_on: u32, fail_compose_on_repair: bool) -> SkillRegistry {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = SkillRegistry::new();
        registry.register(
            "compose",
            skill_fn(move |inputs: NodeInputs, ctx: ExecutionContext| async move {
                if fail_compose_on_repair && ctx.node_index > 0 {
                    anyhow::bail!("renderer crashed");
                }
                Ok(json!({"take": ctx.seed, "n": inputs.len()}))
            }),
        );
        registry.register_with_selector(
            "validate",
            skill_fn(move |_, _| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(json!({"pass": pass_on != 0 && n >= pass_on, "scores": {"n": n}})) }
            }),
            InputSelector::validation(),
        );
        registry.register_with_selector(
            "fix",
            skill_fn(|_, ctx: ExecutionContext| async move { Ok(json!({"lyrics": ctx.seed})) }),
            InputSelector::repair(),
        );
        registry
    }

    async fn setup(registry: SkillRegistry) -> (NodeExecutor, InMemoryRunStore, EventLog, RunScope) {
        let store = InMemoryRunStore::new();
        let log = EventLog::new();
        store.create_run(Run::new("run-1", "song", 42, "h")).await.unwrap();
        store
            .update_run("run-1", RunPatch::new().status(RunStatus::Running))
            .await
            .unwrap();
        let executor = NodeExecutor::new(
            Arc::new(registry),
            Arc::new(store.clone()),
            Arc::new(log.clone()),
        );
        let scope = RunScope {
            run_id: "run-1".into(),
            subject_id: "song".into(),
            base_seed: 42,
            inputs: Arc::new(NodeInputs::new()),
            flags: FeatureFlags::new(),
            roles: Arc::new(Roles::default()),
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            cancel: CancellationToken::new(),
        };
        (executor, store, log, scope)
    }

    /// Run compose + validate once, then the loop.
    async fn drive(
        registry: SkillRegistry,
        max: u32,
    ) -> (Result<FixLoopOutcome>, ExecutionTrace, InMemoryRunStore, EventLog) {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let (executor, store, log, scope) = setup(registry).await;
        let compose = manifest.node("compose").unwrap();
        let validate = manifest.node("validate").unwrap();
        let fix = manifest.node("fix").unwrap();

        let mut trace = ExecutionTrace::new();
        executor.run_next(&scope, compose, &mut trace).await.unwrap();
        let out = executor.run_next(&scope, validate, &mut trace).await.unwrap();
        let initial = ValidationReport::from_output("validate", &out).unwrap();

        let outcome = FixLoop::new(&executor, fix, compose, validate, max)
            .run(&scope, &mut trace, Some(initial))
            .await;
        (outcome, trace, store, log)
    }

    #[tokio::test]
    async fn never_passing_validator_runs_exactly_max_iterations() {
        let (outcome, trace, store, _log) = drive(registry(0, false), 3).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.iterations, 3);
        assert!(outcome.exhausted);
        assert!(!outcome.passed);
        // 2 pre-loop executions + 3 per iteration
        assert_eq!(trace.len(), 2 + 3 * 3);
        assert_eq!(store.executions("run-1").await.unwrap().len(), 11);
    }

    #[tokio::test]
    async fn passing_validation_exits_early() {
        let (outcome, trace, _store, log) = drive(registry(2, false), 3).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(outcome.passed);
        assert!(!outcome.exhausted);
        assert_eq!(trace.len(), 5);
        assert_eq!(outcome.last_validation.unwrap().scores["n"], json!(2));

        let finished = log
            .events()
            .into_iter()
            .filter(|e| matches!(e.kind, EventKind::FixLoopFinished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn already_passing_skips_the_loop() {
        let (outcome, trace, _store, _log) = drive(registry(1, false), 3).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.passed);
        assert_eq!(trace.len(), 2);
    }

    #[tokio::test]
    async fn seeds_never_repeat_across_iterations() {
        let (_outcome, _trace, store, _log) = drive(registry(0, false), 3).await;
        let seeds: Vec<i64> = store
            .executions("run-1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.seed)
            .collect();
        assert_eq!(seeds, (43..=53).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn execution_error_propagates_without_retry() {
        let (outcome, trace, store, _log) = drive(registry(0, true), 3).await;
        let err = outcome.unwrap_err();

        assert!(matches!(err, CadenceError::SkillFailed { ref node, .. } if node == "compose"));
        // compose, validate, fix, failed compose
        assert_eq!(trace.len(), 3);
        let records = store.executions("run-1").await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(store.get_run("run-1").await.unwrap().current_node.as_deref(), Some("compose"));
    }

    #[tokio::test]
    async fn zero_max_never_repairs() {
        let (outcome, trace, _store, _log) = drive(registry(0, false), 0).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.exhausted);
        assert_eq!(trace.len(), 2);
    }
}
