//! Cadence Error Types with Error Codes
//!
//! Error code ranges:
//! - CAD-000-009: Manifest errors
//! - CAD-010-019: Configuration errors
//! - CAD-020-029: Argument / determinism errors
//! - CAD-030-039: Skill execution errors
//! - CAD-040-049: Persistence errors
//! - CAD-050-059: Orchestration errors
//! - CAD-060-069: IO / serialization errors

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CadenceError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum CadenceError {
    // ═══════════════════════════════════════════
    // MANIFEST ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[CAD-001] Failed to parse manifest: {details}")]
    ManifestParse { details: String },

    #[error("[CAD-002] Invalid manifest schema: expected '{expected}', got '{actual}'")]
    InvalidSchema { expected: String, actual: String },

    #[error("[CAD-003] Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("[CAD-004] Invalid condition '{expr}' on node '{node}': {reason}")]
    InvalidCondition {
        node: String,
        expr: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[CAD-010] No skill registered for node '{node}'")]
    SkillNotRegistered { node: String },

    #[error("[CAD-011] Configuration error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // ARGUMENT ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[CAD-020] Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("[CAD-021] Invalid decoder settings: {reason}")]
    InvalidDecoderSettings { reason: String },

    // ═══════════════════════════════════════════
    // SKILL EXECUTION ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[CAD-030] Skill for node '{node}' failed: {reason}")]
    SkillFailed { node: String, reason: String },

    #[error("[CAD-031] Node '{node}' produced an invalid validation report: {reason}")]
    InvalidValidationReport { node: String, reason: String },

    #[error("[CAD-032] Node '{node}' was cancelled")]
    Cancelled { node: String },

    // ═══════════════════════════════════════════
    // PERSISTENCE ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[CAD-040] Run '{run_id}' not found")]
    RunNotFound { run_id: String },

    #[error("[CAD-041] Execution {node_index} of run '{run_id}' not found")]
    ExecutionNotFound { run_id: String, node_index: usize },

    #[error("[CAD-042] Record conflict: {reason}")]
    RecordConflict { reason: String },

    #[error("[CAD-043] Store error: {reason}")]
    Store { reason: String },

    // ═══════════════════════════════════════════
    // ORCHESTRATION ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[CAD-050] Run '{run_id}' halted at node '{node}' ({at}): {source}")]
    Orchestration {
        run_id: String,
        node: String,
        at: DateTime<Utc>,
        #[source]
        source: Box<CadenceError>,
    },

    #[error("[CAD-051] Fix loop exhausted after {iterations} iterations without a passing validation")]
    FixLoopExhausted { iterations: u32 },

    #[error("[CAD-052] Parallel stage task panicked: {reason}")]
    TaskPanicked { reason: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[CAD-060] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[CAD-061] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[CAD-062] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CadenceError {
    /// Configuration errors abort immediately and are never retried.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::SkillNotRegistered { .. }
            | Self::ConfigError { .. }
            | Self::ManifestParse { .. }
            | Self::InvalidSchema { .. }
            | Self::InvalidManifest { .. }
            | Self::InvalidCondition { .. } => true,
            Self::Orchestration { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// True when the underlying cause is a cancellation signal
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Orchestration { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Node id carried by the error, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::SkillNotRegistered { node }
            | Self::InvalidCondition { node, .. }
            | Self::SkillFailed { node, .. }
            | Self::InvalidValidationReport { node, .. }
            | Self::Cancelled { node }
            | Self::Orchestration { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Error code, e.g. `CAD-030`
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManifestParse { .. } => "CAD-001",
            Self::InvalidSchema { .. } => "CAD-002",
            Self::InvalidManifest { .. } => "CAD-003",
            Self::InvalidCondition { .. } => "CAD-004",
            Self::SkillNotRegistered { .. } => "CAD-010",
            Self::ConfigError { .. } => "CAD-011",
            Self::InvalidArgument { .. } => "CAD-020",
            Self::InvalidDecoderSettings { .. } => "CAD-021",
            Self::SkillFailed { .. } => "CAD-030",
            Self::InvalidValidationReport { .. } => "CAD-031",
            Self::Cancelled { .. } => "CAD-032",
            Self::RunNotFound { .. } => "CAD-040",
            Self::ExecutionNotFound { .. } => "CAD-041",
            Self::RecordConflict { .. } => "CAD-042",
            Self::Store { .. } => "CAD-043",
            Self::Orchestration { .. } => "CAD-050",
            Self::FixLoopExhausted { .. } => "CAD-051",
            Self::TaskPanicked { .. } => "CAD-052",
            Self::Io(_) => "CAD-060",
            Self::Json(_) => "CAD-061",
            Self::Yaml(_) => "CAD-062",
        }
    }
}

impl FixSuggestion for CadenceError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            CadenceError::ManifestParse { .. } | CadenceError::Yaml(_) => {
                Some("Check YAML syntax: indentation and quoting")
            }
            CadenceError::InvalidSchema { .. } => {
                Some("Use 'cadence/manifest@1' as the schema version")
            }
            CadenceError::InvalidManifest { .. } => {
                Some("Node ids must be unique and inputs must reference earlier nodes")
            }
            CadenceError::InvalidCondition { .. } => Some(
                "Use validation.passed, validation.failed, flags.<name>, or two of them joined by &&",
            ),
            CadenceError::SkillNotRegistered { .. } => {
                Some("Register a skill for every manifest node before starting the run")
            }
            CadenceError::ConfigError { .. } => Some("Check ~/.config/cadence/config.toml"),
            CadenceError::InvalidArgument { .. } => {
                Some("Seeds must be >= 0 and node indexes >= 1")
            }
            CadenceError::InvalidDecoderSettings { .. } => {
                Some("temperature and top_p must lie in [0, 1]; max_tokens must be > 0")
            }
            CadenceError::SkillFailed { .. } => Some("Inspect the node inputs in the run trace"),
            CadenceError::InvalidValidationReport { .. } => {
                Some("The validator must return an object with a boolean 'pass' field")
            }
            CadenceError::Cancelled { .. } => None,
            CadenceError::RunNotFound { .. } | CadenceError::ExecutionNotFound { .. } => {
                Some("Verify the run id")
            }
            CadenceError::RecordConflict { .. } => {
                Some("Execution records are append-only; do not reuse (run_id, node_index)")
            }
            CadenceError::Store { .. } => Some("Check the persistence backend"),
            CadenceError::Orchestration { source, .. } => source.fix_suggestion(),
            CadenceError::FixLoopExhausted { .. } => Some(
                "Raise max_retries on the fix node or set on_fix_exhausted = \"complete\"",
            ),
            CadenceError::TaskPanicked { .. } => None,
            CadenceError::Io(_) => Some("Check file path and permissions"),
            CadenceError::Json(_) => Some("Ensure the file contains valid JSON"),
        }
    }
}
