//! Cadence - deterministic workflow orchestration for music generation
//!
//! A run walks a YAML manifest of nodes (plan, style, lyrics, producer,
//! compose, validate, fix, render, review) in declared order. Every node
//! gets a seed derived from the run's base seed and its execution index, so
//! the same manifest, inputs and seed reproduce the same outputs.

pub mod ast;
pub mod config;
pub mod determinism;
pub mod error;
pub mod event;
pub mod retrieval;
pub mod runtime;
pub mod skill;
pub mod store;
pub mod util;

pub use ast::{Condition, FeatureFlags, Manifest, NodeSpec};
pub use config::{EngineConfig, FixExhaustionPolicy};
pub use determinism::{derive_seed, hash_artifact, SeededRandom};
pub use error::{CadenceError, FixSuggestion, Result};
pub use event::{Event, EventEmitter, EventKind, EventLog, NoopEmitter, TraceWriter};
pub use retrieval::{pinned_retrieve, PinnedChunk, RetrievalResult, Source};
pub use runtime::{Orchestrator, RunRequest, RunSummary, ValidationReport};
pub use skill::{skill_fn, ExecutionContext, Skill, SkillRegistry};
pub use store::{InMemoryRunStore, NodeExecution, Run, RunStatus, RunStore};
