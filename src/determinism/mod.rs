//! Determinism Module - reproducibility primitives
//!
//! Pure, stateless helpers every node relies on:
//! - `seed`: per-node seed derivation and `SeededRandom`
//! - `hash`: canonical content hashing for provenance
//! - `decoder`: decoder settings validation with reproducibility advisories

mod decoder;
mod hash;
mod seed;

pub use decoder::{
    validate_decoder_settings, validate_decoder_settings_with, DecoderAdvisory, DecoderSettings,
};
pub use hash::{canonicalize_json, hash_artifact, hash_bytes, hash_serializable, Artifact};
pub use seed::{derive_seed, SeededRandom};
