//! Centralized constants for Cadence runtime configuration
//!
//! Defaults and reserved names in one place for easy tuning.

// ═══════════════════════════════════════════════════════════════
// Manifest
// ═══════════════════════════════════════════════════════════════

/// Schema string every manifest must declare
pub const MANIFEST_SCHEMA: &str = "cadence/manifest@1";

/// Pseudo node id that refers to the run request inputs
pub const RUN_INPUT_NODE: &str = "input";

/// Node whose output is treated as the validation report
pub const DEFAULT_VALIDATOR_NODE: &str = "validate";

/// Node re-invoked by the fix loop after each repair
pub const DEFAULT_COMPOSE_NODE: &str = "compose";

/// Fix-loop node assumed when a manifest declares none
pub const DEFAULT_FIX_NODE: &str = "fix";

/// Prefix marking a role reference (`@validator`, `@compose`, `@fix`)
pub const ROLE_PREFIX: char = '@';

// ═══════════════════════════════════════════════════════════════
// Fix loop
// ═══════════════════════════════════════════════════════════════

/// Repair iterations allowed before the fix loop gives up
pub const DEFAULT_MAX_FIX_ITERATIONS: u32 = 3;

// ═══════════════════════════════════════════════════════════════
// Determinism
// ═══════════════════════════════════════════════════════════════

/// Temperatures above this are accepted but flagged as non-reproducible
pub const REPRODUCIBILITY_TEMPERATURE_THRESHOLD: f64 = 0.3;

/// Digest prefix produced by `hash_artifact`
pub const HASH_PREFIX: &str = "sha256:";

// ═══════════════════════════════════════════════════════════════
// Retrieval / traces
// ═══════════════════════════════════════════════════════════════

/// Chunks returned by retrieval when the caller does not ask for a count
pub const DEFAULT_TOP_K: usize = 5;

/// Directory for NDJSON run traces
pub const TRACE_DIR: &str = ".cadence/traces";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert_eq!(DEFAULT_MAX_FIX_ITERATIONS, 3);
        assert!(REPRODUCIBILITY_TEMPERATURE_THRESHOLD > 0.0);
        assert!(REPRODUCIBILITY_TEMPERATURE_THRESHOLD < 1.0);
        assert!(DEFAULT_TOP_K > 0);
    }

    #[test]
    fn reserved_node_ids_differ() {
        assert_ne!(RUN_INPUT_NODE, DEFAULT_VALIDATOR_NODE);
        assert_ne!(RUN_INPUT_NODE, DEFAULT_COMPOSE_NODE);
        assert_ne!(RUN_INPUT_NODE, DEFAULT_FIX_NODE);
    }
}
