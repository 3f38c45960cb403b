//! Validation reports
//!
//! A failing report (`pass: false`) is ordinary output, not an error; only a
//! malformed report is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CadenceError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub pass: bool,
    /// Score table reported by the validator (`{}` when absent)
    #[serde(default)]
    pub scores: Map<String, Value>,
    /// The validator's full output
    pub raw: Value,
}

impl ValidationReport {
    /// Read a report out of a validator's output: an object with a boolean
    /// `pass` and an optional `scores` object.
    pub fn from_output(node: &str, output: &Value) -> Result<Self> {
        let invalid = |reason: &str| CadenceError::InvalidValidationReport {
            node: node.to_string(),
            reason: reason.to_string(),
        };

        let object = output
            .as_object()
            .ok_or_else(|| invalid("output is not an object"))?;
        let pass = object
            .get("pass")
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid("missing boolean 'pass'"))?;
        let scores = match object.get("scores") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(scores)) => scores.clone(),
            Some(_) => return Err(invalid("'scores' must be an object")),
        };

        Ok(Self {
            pass,
            scores,
            raw: output.clone(),
        })
    }
}
