//! Input selection strategies
//!
//! Every registered skill carries an `InputSelector` that builds its inputs
//! from the execution trace:
//!
//! - `Upstream`: one entry per id in the node's declared `inputs`
//! - `Aggregate`: named fields pulled from several nodes; the last source
//!   present wins, so repaired variants shadow the originals
//!
//! `InputSelector::validation()` and `InputSelector::repair()` are the stock
//! aggregations for the validator and fix stages. They name the validator,
//! compose and fix nodes by role (`@validator`, `@compose`, `@fix`); the
//! run's `Roles` map each role to the manifest's node id.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::ast::{Manifest, NodeSpec};
use crate::util::{
    DEFAULT_COMPOSE_NODE, DEFAULT_FIX_NODE, DEFAULT_VALIDATOR_NODE, ROLE_PREFIX, RUN_INPUT_NODE,
};

use super::trace::ExecutionTrace;

/// Inputs handed to a skill, keyed by upstream id or pick name
pub type NodeInputs = serde_json::Map<String, Value>;

/// Node ids behind the `@validator`, `@compose` and `@fix` roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roles {
    pub validator: Arc<str>,
    pub compose: Arc<str>,
    pub fix: Arc<str>,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            validator: Arc::from(DEFAULT_VALIDATOR_NODE),
            compose: Arc::from(DEFAULT_COMPOSE_NODE),
            fix: Arc::from(DEFAULT_FIX_NODE),
        }
    }
}

impl Roles {
    /// Validator from the manifest; fix and compose from its first fix loop
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut roles = Self {
            validator: Arc::clone(&manifest.validator),
            ..Self::default()
        };
        if let Some(fix) = manifest.nodes().iter().find(|n| n.is_fix_loop()) {
            roles = roles.for_node(fix);
        }
        roles
    }

    /// A fix-loop node reads its own repairs and its own compose target
    fn for_node(&self, node: &NodeSpec) -> Self {
        match &node.fix_loop {
            Some(fix_loop) => Self {
                validator: Arc::clone(&self.validator),
                compose: Arc::clone(&fix_loop.compose),
                fix: Arc::clone(&node.id),
            },
            None => self.clone(),
        }
    }

    fn resolve<'a>(&'a self, node: &'a str) -> &'a str {
        match node.strip_prefix(ROLE_PREFIX) {
            Some("validator") => &*self.validator,
            Some("compose") => &*self.compose,
            Some("fix") => &*self.fix,
            _ => node,
        }
    }
}

/// `node` or `node.field`; `input.field` reads the run inputs.
/// `@role` in place of a node id is resolved through `Roles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub node: String,
    pub field: Option<String>,
}

impl FieldRef {
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('.') {
            Some((node, field)) => Self {
                node: node.to_string(),
                field: Some(field.to_string()),
            },
            None => Self {
                node: spec.to_string(),
                field: None,
            },
        }
    }

    fn resolve(
        &self,
        trace: &ExecutionTrace,
        run_inputs: &NodeInputs,
        roles: &Roles,
    ) -> Option<Value> {
        let node = roles.resolve(&self.node);
        let whole = if node == RUN_INPUT_NODE {
            match &self.field {
                Some(field) => return run_inputs.get(field).filter(|v| !v.is_null()).cloned(),
                None => return Some(Value::Object(run_inputs.clone())),
            }
        } else {
            trace.latest(node)?
        };

        match &self.field {
            Some(field) => whole.get(field).filter(|v| !v.is_null()).cloned(),
            None => Some((**whole).clone()),
        }
    }
}

/// One aggregated input: `key` takes the last present value among `sources`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub key: String,
    pub sources: Vec<FieldRef>,
}

impl Pick {
    pub fn new(key: impl Into<String>, sources: &[&str]) -> Self {
        Self {
            key: key.into(),
            sources: sources.iter().map(|s| FieldRef::parse(s)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InputSelector {
    #[default]
    Upstream,
    Aggregate(Vec<Pick>),
}

impl InputSelector {
    /// Artifacts a validator judges: lyrics, style, producer notes, the
    /// composition, blueprint and compiled spec, plus any repaired variants.
    pub fn validation() -> Self {
        Self::Aggregate(Self::artifact_picks())
    }

    /// Everything the validator sees plus the validation report itself
    pub fn repair() -> Self {
        let mut picks = Self::artifact_picks();
        picks.push(Pick::new("validation", &["@validator"]));
        Self::Aggregate(picks)
    }

    fn artifact_picks() -> Vec<Pick> {
        vec![
            Pick::new("lyrics", &["lyrics", "@fix.lyrics"]),
            Pick::new("style", &["style", "@fix.style"]),
            Pick::new("producer_notes", &["producer", "@fix.producer_notes"]),
            Pick::new("composed", &["@compose"]),
            Pick::new("blueprint", &["plan.blueprint", "input.blueprint"]),
            Pick::new("sds", &["plan.sds", "input.sds"]),
        ]
    }

    /// Build a node's inputs from the trace and the run inputs
    pub fn select(
        &self,
        node: &NodeSpec,
        trace: &ExecutionTrace,
        run_inputs: &NodeInputs,
        roles: &Roles,
    ) -> NodeInputs {
        let roles = roles.for_node(node);
        let mut inputs = NodeInputs::new();
        match self {
            Self::Upstream => {
                for upstream in &node.inputs {
                    let source = FieldRef::parse(upstream);
                    match source.resolve(trace, run_inputs, &roles) {
                        Some(value) => {
                            inputs.insert(upstream.to_string(), value);
                        }
                        None => debug!(node = %node.id, upstream = %upstream, "upstream has no output"),
                    }
                }
            }
            Self::Aggregate(picks) => {
                for pick in picks {
                    let value = pick
                        .sources
                        .iter()
                        .filter_map(|source| source.resolve(trace, run_inputs, &roles))
                        .last();
                    if let Some(value) = value {
                        inputs.insert(pick.key.clone(), value);
                    }
                }
            }
        }
        debug!(node = %node.id, keys = ?inputs.keys().collect::<Vec<_>>(), "inputs selected");
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Manifest;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manifest() -> Manifest {
        Manifest::from_yaml(
            r#"
schema: cadence/manifest@1
nodes:
  - id: plan
    inputs: [input]
  - id: style
    inputs: [plan]
  - id: lyrics
    inputs: [plan]
  - id: producer
    inputs: [plan]
  - id: compose
    inputs: [style, lyrics, producer]
  - id: validate
  - id: fix
    fix_loop: {}
"#,
        )
        .unwrap()
    }

    fn run_inputs() -> NodeInputs {
        json!({"blueprint": "pop-anthem", "sds": {"bpm": 120}})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn trace() -> ExecutionTrace {
        let mut trace = ExecutionTrace::new();
        trace.push("plan".into(), Arc::new(json!({"sections": ["verse", "chorus"]})));
        trace.push("style".into(), Arc::new(json!({"genre": "synthwave"})));
        trace.push("lyrics".into(), Arc::new(json!({"text": "neon"})));
        trace.push("producer".into(), Arc::new(json!({"mix": "wide"})));
        trace.push("compose".into(), Arc::new(json!({"artifact": "take-1"})));
        trace
    }

    #[test]
    fn upstream_selects_declared_inputs() {
        let manifest = manifest();
        let compose = manifest.node("compose").unwrap();
        let inputs = InputSelector::Upstream.select(compose, &trace(), &run_inputs(), &Roles::default());

        assert_eq!(
            inputs.keys().cloned().collect::<Vec<_>>(),
            vec!["lyrics", "producer", "style"]
        );
        assert_eq!(inputs["style"], json!({"genre": "synthwave"}));
    }

    #[test]
    fn upstream_input_pseudo_node_is_run_inputs() {
        let manifest = manifest();
        let plan = manifest.node("plan").unwrap();
        let inputs = InputSelector::Upstream.select(
            plan,
            &ExecutionTrace::new(),
            &run_inputs(),
            &Roles::default(),
        );
        assert_eq!(inputs["input"]["blueprint"], json!("pop-anthem"));
    }

    #[test]
    fn validation_aggregates_artifacts() {
        let manifest = manifest();
        let validate = manifest.node("validate").unwrap();
        let roles = Roles::from_manifest(&manifest);
        let inputs = InputSelector::validation().select(validate, &trace(), &run_inputs(), &roles);

        assert_eq!(inputs["lyrics"], json!({"text": "neon"}));
        assert_eq!(inputs["producer_notes"], json!({"mix": "wide"}));
        assert_eq!(inputs["composed"], json!({"artifact": "take-1"}));
        assert_eq!(inputs["blueprint"], json!("pop-anthem"));
        assert_eq!(inputs["sds"], json!({"bpm": 120}));
        assert!(!inputs.contains_key("validation"));
    }

    #[test]
    fn repaired_variants_shadow_originals() {
        let manifest = manifest();
        let fix = manifest.node("fix").unwrap();
        let mut trace = trace();
        trace.push("validate".into(), Arc::new(json!({"pass": false})));
        trace.push("fix".into(), Arc::new(json!({"lyrics": {"text": "neon, revised"}})));

        let roles = Roles::from_manifest(&manifest);
        let inputs = InputSelector::repair().select(fix, &trace, &run_inputs(), &roles);
        assert_eq!(inputs["lyrics"], json!({"text": "neon, revised"}));
        assert_eq!(inputs["style"], json!({"genre": "synthwave"}));
        assert_eq!(inputs["validation"], json!({"pass": false}));
    }

    #[test]
    fn roles_follow_renamed_validator_and_fix_nodes() {
        let manifest = Manifest::from_yaml(
            r#"
schema: cadence/manifest@1
validator: judge
nodes:
  - id: lyrics
  - id: arrange
    inputs: [lyrics]
  - id: judge
  - id: repair
    fix_loop: { compose: arrange }
"#,
        )
        .unwrap();
        let roles = Roles::from_manifest(&manifest);
        assert_eq!(&*roles.validator, "judge");
        assert_eq!(&*roles.compose, "arrange");
        assert_eq!(&*roles.fix, "repair");

        let mut trace = ExecutionTrace::new();
        trace.push("lyrics".into(), Arc::new(json!({"text": "neon"})));
        trace.push("arrange".into(), Arc::new(json!({"artifact": "take-1"})));
        trace.push("judge".into(), Arc::new(json!({"pass": false})));
        trace.push("repair".into(), Arc::new(json!({"lyrics": {"text": "neon, revised"}})));

        let repair = manifest.node("repair").unwrap();
        let inputs = InputSelector::repair().select(repair, &trace, &run_inputs(), &roles);
        assert_eq!(inputs["validation"], json!({"pass": false}));
        assert_eq!(inputs["composed"], json!({"artifact": "take-1"}));
        assert_eq!(inputs["lyrics"], json!({"text": "neon, revised"}));

        // the default roles would miss every renamed node
        let blind = InputSelector::repair().select(
            manifest.node("judge").unwrap(),
            &trace,
            &run_inputs(),
            &Roles::default(),
        );
        assert!(!blind.contains_key("validation"));
        assert!(!blind.contains_key("composed"));
    }

    #[test]
    fn field_ref_parsing() {
        assert_eq!(
            FieldRef::parse("fix.lyrics"),
            FieldRef {
                node: "fix".into(),
                field: Some("lyrics".into())
            }
        );
        assert_eq!(FieldRef::parse("compose").field, None);
    }
}
