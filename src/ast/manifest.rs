//! Manifest Types - the declarative node graph
//!
//! A manifest is an ordered list of nodes, loaded once and immutable for the
//! lifetime of a run. Nodes execute strictly in declared order; consecutive
//! nodes sharing a `parallel` group form one concurrent stage.
//!
//! ```yaml
//! schema: cadence/manifest@1
//! name: song
//! nodes:
//!   - id: plan
//!   - id: style
//!     inputs: [plan]
//!     parallel: draft
//!   - id: lyrics
//!     inputs: [plan]
//!     parallel: draft
//!   - id: compose
//!     inputs: [style, lyrics]
//!   - id: validate
//!   - id: fix
//!     condition: validation.failed
//!     max_retries: 3
//!     fix_loop: { compose: compose }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::determinism::{hash_serializable, validate_decoder_settings, DecoderSettings};
use crate::error::{CadenceError, Result};
use crate::util::{DEFAULT_COMPOSE_NODE, DEFAULT_VALIDATOR_NODE, MANIFEST_SCHEMA, RUN_INPUT_NODE};

use super::condition::Condition;

/// Node ids: start with a letter, then letters, digits, `_` or `-`
static NODE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("node id pattern is valid")
});

// ═══════════════════════════════════════════════════════════════
// RAW (YAML) FORM
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestRaw {
    schema: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_validator")]
    validator: String,
    nodes: Vec<NodeSpecRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSpecRaw {
    id: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fix_loop: Option<FixLoopRaw>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decoder: Option<DecoderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixLoopRaw {
    #[serde(default = "default_compose")]
    compose: String,
}

fn default_validator() -> String {
    DEFAULT_VALIDATOR_NODE.to_string()
}

fn default_compose() -> String {
    DEFAULT_COMPOSE_NODE.to_string()
}

// ═══════════════════════════════════════════════════════════════
// VALIDATED FORM
// ═══════════════════════════════════════════════════════════════

/// The repair subgraph driven from a fix node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixLoopSpec {
    /// Node re-run after each repair
    pub compose: Arc<str>,
}

/// One stage of the workflow
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: Arc<str>,
    /// Upstream node ids (or `input`) whose outputs this node consumes
    pub inputs: Vec<Arc<str>>,
    pub condition: Option<Condition>,
    pub max_retries: Option<u32>,
    pub fix_loop: Option<FixLoopSpec>,
    pub parallel: Option<String>,
    pub decoder: Option<DecoderSettings>,
}

impl NodeSpec {
    pub fn is_fix_loop(&self) -> bool {
        self.fix_loop.is_some()
    }
}

/// A group of nodes scheduled together
#[derive(Debug, Clone)]
pub enum Stage {
    Single(Arc<NodeSpec>),
    Parallel {
        group: String,
        nodes: Vec<Arc<NodeSpec>>,
    },
}

/// Validated, immutable manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    pub schema: String,
    pub name: Option<String>,
    /// Node whose output is the validation report
    pub validator: Arc<str>,
    nodes: Vec<Arc<NodeSpec>>,
    content_hash: String,
}

impl Manifest {
    /// Parse and validate a YAML manifest
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: ManifestRaw =
            serde_yaml::from_str(yaml).map_err(|e| CadenceError::ManifestParse {
                details: e.to_string(),
            })?;
        Self::from_raw(raw)
    }

    /// Read, parse and validate a manifest file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn nodes(&self) -> &[Arc<NodeSpec>] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Arc<NodeSpec>> {
        self.nodes.iter().find(|n| &*n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical content hash of the manifest (provenance)
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Nodes grouped into execution stages, in declared order
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = Vec::new();
        for node in &self.nodes {
            match (&node.parallel, stages.last_mut()) {
                (Some(group), Some(Stage::Parallel { group: last, nodes })) if group == last => {
                    nodes.push(Arc::clone(node));
                }
                (Some(group), _) => stages.push(Stage::Parallel {
                    group: group.clone(),
                    nodes: vec![Arc::clone(node)],
                }),
                (None, _) => stages.push(Stage::Single(Arc::clone(node))),
            }
        }
        stages
    }

    fn from_raw(raw: ManifestRaw) -> Result<Self> {
        if raw.schema != MANIFEST_SCHEMA {
            return Err(CadenceError::InvalidSchema {
                expected: MANIFEST_SCHEMA.to_string(),
                actual: raw.schema,
            });
        }
        if raw.nodes.is_empty() {
            return Err(invalid("manifest declares no nodes"));
        }

        let content_hash = hash_serializable(&raw)?;
        let mut declared: HashSet<String> = HashSet::new();
        let mut closed_groups: HashSet<String> = HashSet::new();
        let mut current_group: Option<(String, Vec<String>)> = None;
        let mut nodes = Vec::with_capacity(raw.nodes.len());

        for spec in &raw.nodes {
            let id = spec.id.as_str();
            if !NODE_ID.is_match(id) {
                return Err(invalid(format!("invalid node id '{}'", id)));
            }
            if id == RUN_INPUT_NODE {
                return Err(invalid(format!("node id '{}' is reserved", id)));
            }
            if declared.contains(id) {
                return Err(invalid(format!("duplicate node id '{}'", id)));
            }

            for input in &spec.inputs {
                if input != RUN_INPUT_NODE && !declared.contains(input) {
                    return Err(invalid(format!(
                        "node '{}' consumes '{}', which is not declared before it",
                        id, input
                    )));
                }
            }

            let condition = spec
                .condition
                .as_deref()
                .map(|expr| {
                    expr.parse::<Condition>()
                        .map_err(|reason| CadenceError::InvalidCondition {
                            node: id.to_string(),
                            expr: expr.to_string(),
                            reason,
                        })
                })
                .transpose()?;

            let fix_loop = match &spec.fix_loop {
                Some(fl) => {
                    for (role, target) in [("compose", &fl.compose), ("validator", &raw.validator)] {
                        if target == id || !declared.contains(target) {
                            return Err(invalid(format!(
                                "fix loop on '{}' needs {} node '{}' declared before it",
                                id, role, target
                            )));
                        }
                    }
                    Some(FixLoopSpec {
                        compose: Arc::from(fl.compose.as_str()),
                    })
                }
                None => {
                    if spec.max_retries.is_some() {
                        warn!(node = id, "max_retries is only meaningful on a fix loop node");
                    }
                    None
                }
            };

            // Parallel groups: contiguous, no fix loop, no intra-group wiring
            match (&spec.parallel, current_group.take()) {
                (Some(group), Some((open, mut members))) if *group == open => {
                    if let Some(dep) = spec.inputs.iter().find(|i| members.contains(*i)) {
                        return Err(invalid(format!(
                            "parallel node '{}' consumes '{}' from its own group '{}'",
                            id, dep, group
                        )));
                    }
                    members.push(id.to_string());
                    current_group = Some((open, members));
                }
                (Some(group), previous) => {
                    if let Some((open, _)) = previous {
                        closed_groups.insert(open);
                    }
                    if closed_groups.contains(group) {
                        return Err(invalid(format!(
                            "parallel group '{}' is not contiguous",
                            group
                        )));
                    }
                    current_group = Some((group.clone(), vec![id.to_string()]));
                }
                (None, previous) => {
                    if let Some((open, _)) = previous {
                        closed_groups.insert(open);
                    }
                }
            }
            if spec.parallel.is_some() && (fix_loop.is_some() || id == raw.validator) {
                return Err(invalid(format!(
                    "node '{}' drives validation and cannot run in a parallel group",
                    id
                )));
            }

            if let Some(decoder) = &spec.decoder {
                let advisories = validate_decoder_settings(decoder).map_err(|e| {
                    invalid(format!("node '{}' decoder settings: {}", id, e))
                })?;
                for advisory in advisories {
                    warn!(node = id, %advisory, "decoder advisory");
                }
            }

            nodes.push(Arc::new(NodeSpec {
                id: Arc::from(id),
                inputs: spec.inputs.iter().map(|i| Arc::from(i.as_str())).collect(),
                condition,
                max_retries: spec.max_retries,
                fix_loop,
                parallel: spec.parallel.clone(),
                decoder: spec.decoder,
            }));
            declared.insert(id.to_string());
        }

        Ok(Self {
            schema: raw.schema,
            name: raw.name,
            validator: Arc::from(raw.validator.as_str()),
            nodes,
            content_hash,
        })
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = ManifestRaw::deserialize(deserializer)?;
        Manifest::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

fn invalid(reason: impl Into<String>) -> CadenceError {
    CadenceError::InvalidManifest {
        reason: reason.into(),
    }
}
