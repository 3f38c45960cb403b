//! Decoder (sampling) settings for generation calls inside skills.
//!
//! Hard limits fail validation; a temperature above the reproducibility
//! threshold only produces an advisory.

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::util::REPRODUCIBILITY_TEMPERATURE_THRESHOLD;

/// Sampling parameters a skill passes to an external generator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecoderSettings {
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: None,
            seed: None,
        }
    }
}

/// Non-fatal signal raised by `validate_decoder_settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecoderAdvisory {
    /// Output may not reproduce across runs at this temperature
    HighTemperature { temperature: f64, threshold: f64 },
}

impl std::fmt::Display for DecoderAdvisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighTemperature {
                temperature,
                threshold,
            } => write!(
                f,
                "temperature {} exceeds reproducibility threshold {}",
                temperature, threshold
            ),
        }
    }
}

/// Validate decoder settings against the default threshold.
pub fn validate_decoder_settings(settings: &DecoderSettings) -> Result<Vec<DecoderAdvisory>> {
    validate_decoder_settings_with(settings, REPRODUCIBILITY_TEMPERATURE_THRESHOLD)
}

/// Validate decoder settings against an explicit reproducibility threshold.
pub fn validate_decoder_settings_with(
    settings: &DecoderSettings,
    threshold: f64,
) -> Result<Vec<DecoderAdvisory>> {
    check_unit_interval("temperature", settings.temperature)?;
    check_unit_interval("top_p", settings.top_p)?;

    if settings.max_tokens == Some(0) {
        return Err(CadenceError::InvalidDecoderSettings {
            reason: "max_tokens must be > 0".to_string(),
        });
    }
    if let Some(seed) = settings.seed {
        if seed < 0 {
            return Err(CadenceError::InvalidDecoderSettings {
                reason: format!("seed must be >= 0, got {}", seed),
            });
        }
    }

    let mut advisories = Vec::new();
    if settings.temperature > threshold {
        advisories.push(DecoderAdvisory::HighTemperature {
            temperature: settings.temperature,
            threshold,
        });
    }
    Ok(advisories)
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CadenceError::InvalidDecoderSettings {
            reason: format!("{} must lie in [0, 1], got {}", name, value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(temperature: f64, top_p: f64) -> DecoderSettings {
        DecoderSettings {
            temperature,
            top_p,
            max_tokens: None,
            seed: None,
        }
    }

    #[test]
    fn accepts_reproducible_settings() {
        let advisories = validate_decoder_settings(&settings(0.2, 0.9)).unwrap();
        assert!(advisories.is_empty());
    }

    #[test]
    fn threshold_itself_is_not_flagged() {
        assert!(validate_decoder_settings(&settings(0.3, 1.0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn high_temperature_is_advisory_only() {
        let advisories = validate_decoder_settings(&settings(0.8, 0.9)).unwrap();
        assert_eq!(
            advisories,
            vec![DecoderAdvisory::HighTemperature {
                temperature: 0.8,
                threshold: 0.3
            }]
        );
        assert!(advisories[0].to_string().contains("0.8"));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(validate_decoder_settings(&settings(1.5, 0.9)).is_err());
        assert!(validate_decoder_settings(&settings(-0.1, 0.9)).is_err());
        assert!(validate_decoder_settings(&settings(0.1, 1.01)).is_err());
        assert!(validate_decoder_settings(&settings(f64::NAN, 0.5)).is_err());
    }

    #[test]
    fn rejects_zero_max_tokens_and_negative_seed() {
        let mut s = settings(0.1, 0.5);
        s.max_tokens = Some(0);
        assert!(validate_decoder_settings(&s).is_err());

        let mut s = settings(0.1, 0.5);
        s.seed = Some(-4);
        assert!(validate_decoder_settings(&s).is_err());

        let mut s = settings(0.1, 0.5);
        s.max_tokens = Some(512);
        s.seed = Some(0);
        assert!(validate_decoder_settings(&s).is_ok());
    }

    #[test]
    fn custom_threshold() {
        let advisories = validate_decoder_settings_with(&settings(0.5, 0.5), 0.6).unwrap();
        assert!(advisories.is_empty());
    }
}
