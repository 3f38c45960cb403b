//! Utilities Module - shared infrastructure
//!
//! - `constants`: Centralized defaults and reserved names

pub mod constants;

pub use constants::{
    DEFAULT_COMPOSE_NODE, DEFAULT_FIX_NODE, DEFAULT_MAX_FIX_ITERATIONS, DEFAULT_TOP_K,
    DEFAULT_VALIDATOR_NODE, HASH_PREFIX, MANIFEST_SCHEMA, REPRODUCIBILITY_TEMPERATURE_THRESHOLD,
    ROLE_PREFIX, RUN_INPUT_NODE, TRACE_DIR,
};
