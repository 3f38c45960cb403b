//! Cadence Configuration Module
//!
//! Engine defaults stored in `~/.config/cadence/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`CADENCE_MAX_FIX_ITERATIONS`, `CADENCE_ON_FIX_EXHAUSTED`)
//! 2. Config file
//! 3. Defaults

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::FeatureFlags;
use crate::error::{CadenceError, Result};
use crate::util::{DEFAULT_MAX_FIX_ITERATIONS, DEFAULT_TOP_K, REPRODUCIBILITY_TEMPERATURE_THRESHOLD};

pub const ENV_MAX_FIX_ITERATIONS: &str = "CADENCE_MAX_FIX_ITERATIONS";
pub const ENV_ON_FIX_EXHAUSTED: &str = "CADENCE_ON_FIX_EXHAUSTED";

/// What a run does when the fix loop runs out of iterations without a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixExhaustionPolicy {
    /// Best-effort delivery: the run completes with the failing validation
    #[default]
    Complete,
    /// The run fails with `FixLoopExhausted`
    Fail,
}

impl FromStr for FixExhaustionPolicy {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(Self::Complete),
            "fail" => Ok(Self::Fail),
            other => Err(CadenceError::ConfigError {
                reason: format!("unknown fix exhaustion policy '{}' (complete|fail)", other),
            }),
        }
    }
}

impl fmt::Display for FixExhaustionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fix-loop bound when the fix node sets no `max_retries`
    pub max_fix_iterations: u32,
    pub on_fix_exhausted: FixExhaustionPolicy,
    /// Decoder temperature above which an advisory is raised
    pub reproducibility_temperature: f64,
    /// Result count for retrieval when the caller gives none
    pub default_top_k: usize,
    /// Feature flags consulted by `flags.<name>` conditions
    pub flags: FeatureFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: DEFAULT_MAX_FIX_ITERATIONS,
            on_fix_exhausted: FixExhaustionPolicy::Complete,
            reproducibility_temperature: REPRODUCIBILITY_TEMPERATURE_THRESHOLD,
            default_top_k: DEFAULT_TOP_K,
            flags: FeatureFlags::new(),
        }
    }
}

impl EngineConfig {
    /// `~/.config/cadence/` on Unix, `%APPDATA%/cadence/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load the user config file, or defaults when it doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load an explicit config file; missing or malformed is an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CadenceError::ConfigError {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CadenceError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables on top of file values
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_MAX_FIX_ITERATIONS).filter(|v| !v.is_empty()) {
            self.max_fix_iterations =
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| CadenceError::ConfigError {
                        reason: format!(
                            "{} must be a non-negative integer, got '{}'",
                            ENV_MAX_FIX_ITERATIONS, raw
                        ),
                    })?;
        }
        if let Some(raw) = lookup(ENV_ON_FIX_EXHAUSTED).filter(|v| !v.is_empty()) {
            self.on_fix_exhausted = raw.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.reproducibility_temperature) {
            return Err(CadenceError::ConfigError {
                reason: format!(
                    "reproducibility_temperature must lie in [0, 1], got {}",
                    self.reproducibility_temperature
                ),
            });
        }
        Ok(())
    }
}
