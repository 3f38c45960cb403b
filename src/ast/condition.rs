//! Condition expressions gating node execution
//!
//! Grammar (parsed once, at manifest load):
//!
//! ```text
//! condition := atom | atom "&&" atom
//! atom      := "validation.passed" | "validation.failed" | "flags." NAME | "true"
//! ```
//!
//! Anything else is a load-time error; there is no fail-open default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

/// Flag names: identifier-like, dashes allowed
static FLAG_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("flag name pattern is valid")
});

/// Feature flag set consulted by `flags.<name>`
pub type FeatureFlags = BTreeMap<String, bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    ValidationPassed,
    ValidationFailed,
    Flag(String),
    And(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Evaluate against the last validation outcome and the active flags.
    ///
    /// With no validation result yet, neither `passed` nor `failed` holds.
    pub fn evaluate(&self, last_pass: Option<bool>, flags: &FeatureFlags) -> bool {
        match self {
            Condition::Always => true,
            Condition::ValidationPassed => last_pass == Some(true),
            Condition::ValidationFailed => last_pass == Some(false),
            Condition::Flag(name) => flags.get(name).copied().unwrap_or(false),
            Condition::And(lhs, rhs) => {
                lhs.evaluate(last_pass, flags) && rhs.evaluate(last_pass, flags)
            }
        }
    }

    /// True when the expression reads the validation outcome
    pub fn depends_on_validation(&self) -> bool {
        match self {
            Condition::ValidationPassed | Condition::ValidationFailed => true,
            Condition::And(lhs, rhs) => lhs.depends_on_validation() || rhs.depends_on_validation(),
            Condition::Always | Condition::Flag(_) => false,
        }
    }

    fn parse_atom(atom: &str) -> Result<Condition, String> {
        match atom {
            "" => Err("empty operand".to_string()),
            "true" => Ok(Condition::Always),
            "validation.passed" => Ok(Condition::ValidationPassed),
            "validation.failed" => Ok(Condition::ValidationFailed),
            other => match other.strip_prefix("flags.") {
                Some(name) if FLAG_NAME.is_match(name) => Ok(Condition::Flag(name.to_string())),
                Some(name) => Err(format!("invalid flag name '{}'", name)),
                None => Err(format!("unknown operand '{}'", other)),
            },
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = expr.split("&&").map(str::trim).collect();
        match parts.as_slice() {
            [atom] => Condition::parse_atom(atom),
            [lhs, rhs] => Ok(Condition::And(
                Box::new(Condition::parse_atom(lhs)?),
                Box::new(Condition::parse_atom(rhs)?),
            )),
            _ => Err("at most two operands may be joined with &&".to_string()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "true"),
            Condition::ValidationPassed => write!(f, "validation.passed"),
            Condition::ValidationFailed => write!(f, "validation.failed"),
            Condition::Flag(name) => write!(f, "flags.{}", name),
            Condition::And(lhs, rhs) => write!(f, "{} && {}", lhs, rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(pairs: &[(&str, bool)]) -> FeatureFlags {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_atoms() {
        assert_eq!("validation.passed".parse::<Condition>(), Ok(Condition::ValidationPassed));
        assert_eq!(" validation.failed ".parse::<Condition>(), Ok(Condition::ValidationFailed));
        assert_eq!(
            "flags.render".parse::<Condition>(),
            Ok(Condition::Flag("render".to_string()))
        );
        assert_eq!("true".parse::<Condition>(), Ok(Condition::Always));
    }

    #[test]
    fn parses_conjunction_of_two() {
        let cond: Condition = "validation.passed && flags.render".parse().unwrap();
        assert_eq!(
            cond,
            Condition::And(
                Box::new(Condition::ValidationPassed),
                Box::new(Condition::Flag("render".into()))
            )
        );
        assert_eq!(cond.to_string(), "validation.passed && flags.render");
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!("validation.pass".parse::<Condition>().is_err());
        assert!("flags.".parse::<Condition>().is_err());
        assert!("flags.bad name".parse::<Condition>().is_err());
        assert!("".parse::<Condition>().is_err());
        assert!("validation.passed &&".parse::<Condition>().is_err());
        assert!("flags.a && flags.b && flags.c".parse::<Condition>().is_err());
        assert!("validation.passed || flags.x".parse::<Condition>().is_err());
    }

    #[test]
    fn evaluates_against_validation_and_flags() {
        let none = FeatureFlags::new();
        assert!(Condition::ValidationPassed.evaluate(Some(true), &none));
        assert!(!Condition::ValidationPassed.evaluate(Some(false), &none));
        assert!(Condition::ValidationFailed.evaluate(Some(false), &none));

        // No validation yet: neither branch holds
        assert!(!Condition::ValidationPassed.evaluate(None, &none));
        assert!(!Condition::ValidationFailed.evaluate(None, &none));

        let on = flags(&[("render", true), ("review", false)]);
        assert!(Condition::Flag("render".into()).evaluate(None, &on));
        assert!(!Condition::Flag("review".into()).evaluate(None, &on));
        assert!(!Condition::Flag("missing".into()).evaluate(None, &on));

        let gate: Condition = "validation.passed && flags.render".parse().unwrap();
        assert!(gate.evaluate(Some(true), &on));
        assert!(!gate.evaluate(Some(false), &on));
        assert!(!gate.evaluate(Some(true), &none));
    }

    #[test]
    fn dependency_on_validation() {
        let gate: Condition = "flags.a && validation.failed".parse().unwrap();
        assert!(gate.depends_on_validation());
        assert!(!Condition::Flag("a".into()).depends_on_validation());
    }
}
