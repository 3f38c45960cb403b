//! AST Module - parsed manifest types
//!
//! - `manifest`: Manifest, NodeSpec, Stage, FixLoopSpec
//! - `condition`: Condition expressions and FeatureFlags
//!
//! These types are the "what": static structure validated at load time.
//! For execution, see the `runtime` module.

mod condition;
mod manifest;

pub use condition::{Condition, FeatureFlags};
pub use manifest::{FixLoopSpec, Manifest, NodeSpec, Stage};
