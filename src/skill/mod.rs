//! Skill Module - pluggable node transformations
//!
//! A skill is bound to a node id in a `SkillRegistry` built once, before any
//! run starts, and injected into the orchestrator. Skills receive their
//! inputs and an `ExecutionContext`; every bit of randomness and every
//! timestamp a skill uses must come from that context.

pub mod mock;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::determinism::{DecoderSettings, SeededRandom};
use crate::event::{EventEmitter, EventKind};
use crate::retrieval::RetrievalResult;
use crate::runtime::{InputSelector, NodeInputs};
use crate::store::RunStore;

/// A node transformation
#[async_trait]
pub trait Skill: Send + Sync {
    async fn run(&self, inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value>;
}

/// Skill backed by an async closure
pub struct FnSkill<F>(F);

#[async_trait]
impl<F, Fut> Skill for FnSkill<F>
where
    F: Fn(NodeInputs, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
        (self.0)(inputs, ctx).await
    }
}

/// Wrap an async closure as a skill
pub fn skill_fn<F, Fut>(f: F) -> FnSkill<F>
where
    F: Fn(NodeInputs, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnSkill(f)
}

/// A skill plus the strategy that builds its inputs
#[derive(Clone)]
pub struct RegisteredSkill {
    pub skill: Arc<dyn Skill>,
    pub selector: InputSelector,
}

/// Node id → skill; constructed explicitly, no global state
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<Arc<str>, RegisteredSkill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill that consumes its declared upstream inputs
    pub fn register(&mut self, node: &str, skill: impl Skill + 'static) -> &mut Self {
        self.register_with_selector(node, skill, InputSelector::Upstream)
    }

    pub fn register_with_selector(
        &mut self,
        node: &str,
        skill: impl Skill + 'static,
        selector: InputSelector,
    ) -> &mut Self {
        self.skills.insert(
            Arc::from(node),
            RegisteredSkill {
                skill: Arc::new(skill),
                selector,
            },
        );
        self
    }

    pub fn get(&self, node: &str) -> Option<&RegisteredSkill> {
        self.skills.get(node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.skills.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Registered node ids, sorted
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.skills.keys().map(|k| &**k).collect();
        nodes.sort_unstable();
        nodes
    }
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("nodes", &self.nodes())
            .finish()
    }
}

/// Everything a skill may know about its invocation
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: Arc<str>,
    pub subject_id: Arc<str>,
    /// `base_seed + node_index + 1`
    pub seed: i64,
    pub node_index: usize,
    pub node: Arc<str>,
    pub decoder: Option<DecoderSettings>,
    pub(crate) epoch: DateTime<Utc>,
    pub(crate) events: Arc<dyn EventEmitter>,
    pub(crate) store: Arc<dyn RunStore>,
    pub(crate) cancel: CancellationToken,
}

impl ExecutionContext {
    /// The run's deterministic clock; skills never read the wall clock
    pub fn now(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// A fresh generator seeded with this node's seed
    pub fn rng(&self) -> SeededRandom {
        SeededRandom::new(self.seed)
    }

    pub fn events(&self) -> &Arc<dyn EventEmitter> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled (for long-running skills)
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish pinned hashes that failed to resolve, if any
    pub fn emit_drift(&self, result: &RetrievalResult) {
        if result.has_drift() {
            self.events.emit(EventKind::RetrievalDrift {
                node: Arc::clone(&self.node),
                missing: result.missing.clone(),
            });
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("subject_id", &self.subject_id)
            .field("node", &self.node)
            .field("node_index", &self.node_index)
            .field("seed", &self.seed)
            .finish()
    }
}
