use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Search and segmentation parameters for [`crate::HarmonyDecoder`].
///
/// Every field has a default, so a JSON config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Hypotheses kept per frame index.
    pub beam_size: usize,
    /// Hard cap on chord labels expanded from one hypothesis across one range.
    pub max_branching_factor: usize,
    /// Cumulative prior mass the chord branching cutoff tries to cover, in (0, 1].
    pub target_branch_prob: f64,
    /// Recent (key, chord) pairs used to deduplicate hypotheses. `None` keeps
    /// plain beams without deduplication.
    pub signature_length: Option<usize>,
    /// A segment boundary may only fall on frames whose change probability
    /// exceeds this value.
    pub min_change_prob: f64,
    /// Frames whose change probability exceeds this value force a boundary.
    pub max_no_change_prob: f64,
    /// Longest allowed segment, in timeline duration units. `None` is unbounded.
    pub max_segment_duration: Option<f64>,
    pub max_key_branching_factor: usize,
    pub target_key_branch_prob: f64,
}

impl DecoderConfig {
    pub const DEFAULT_BEAM_SIZE: usize = 50;
    pub const DEFAULT_SIGNATURE_LENGTH: usize = 5;

    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::io("read decoder config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| DecodeError::json("parse decoder config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_size == 0 {
            return Err(DecodeError::config("beam_size must be positive"));
        }
        if self.max_branching_factor == 0 {
            return Err(DecodeError::config("max_branching_factor must be positive"));
        }
        if self.max_key_branching_factor == 0 {
            return Err(DecodeError::config(
                "max_key_branching_factor must be positive",
            ));
        }
        check_branch_prob("target_branch_prob", self.target_branch_prob)?;
        check_branch_prob("target_key_branch_prob", self.target_key_branch_prob)?;
        if self.signature_length == Some(0) {
            return Err(DecodeError::config(
                "signature_length must be positive; omit it to disable deduplication",
            ));
        }
        check_unit_interval("min_change_prob", self.min_change_prob)?;
        check_unit_interval("max_no_change_prob", self.max_no_change_prob)?;
        if self.min_change_prob > self.max_no_change_prob {
            return Err(DecodeError::config(format!(
                "undefined change behaviour on probability range ({}, {}): \
                 min_change_prob must not exceed max_no_change_prob",
                self.max_no_change_prob, self.min_change_prob
            )));
        }
        if let Some(duration) = self.max_segment_duration {
            // NaN fails this comparison too.
            if !(duration > 0.0) {
                return Err(DecodeError::config(format!(
                    "max_segment_duration must be positive, got {duration}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn segment_duration_limit(&self) -> f64 {
        self.max_segment_duration.unwrap_or(f64::INFINITY)
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beam_size: Self::DEFAULT_BEAM_SIZE,
            max_branching_factor: 5,
            target_branch_prob: 0.75,
            signature_length: Some(Self::DEFAULT_SIGNATURE_LENGTH),
            min_change_prob: 0.25,
            max_no_change_prob: 0.45,
            max_segment_duration: Some(8.0),
            max_key_branching_factor: 2,
            target_key_branch_prob: 0.5,
        }
    }
}

fn check_branch_prob(name: &str, value: f64) -> Result<(), DecodeError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(DecodeError::config(format!("{name} must be in (0, 1], got {value}")))
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), DecodeError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DecodeError::config(format!("{name} must be in [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_config_default_is_valid() {
        let config = DecoderConfig::default();
        assert_eq!(config.beam_size, DecoderConfig::DEFAULT_BEAM_SIZE);
        assert_eq!(config.signature_length, Some(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_change_thresholds() {
        let config = DecoderConfig {
            min_change_prob: 0.8,
            max_no_change_prob: 0.2,
            ..DecoderConfig::default()
        };
        assert!(matches!(config.validate(), Err(DecodeError::Config { .. })));
    }

    #[test]
    fn rejects_zero_beam_and_branching() {
        let zero_beam = DecoderConfig {
            beam_size: 0,
            ..DecoderConfig::default()
        };
        assert!(zero_beam.validate().is_err());

        let zero_branching = DecoderConfig {
            max_branching_factor: 0,
            ..DecoderConfig::default()
        };
        assert!(zero_branching.validate().is_err());
    }

    #[test]
    fn rejects_empty_signature() {
        let config = DecoderConfig {
            signature_length: Some(0),
            ..DecoderConfig::default()
        };
        assert!(config.validate().is_err());

        let plain = DecoderConfig {
            signature_length: None,
            ..DecoderConfig::default()
        };
        assert!(plain.validate().is_ok());
    }

    #[test]
    fn rejects_bad_branch_prob_and_duration() {
        let zero_target = DecoderConfig {
            target_branch_prob: 0.0,
            ..DecoderConfig::default()
        };
        assert!(zero_target.validate().is_err());

        let nan_duration = DecoderConfig {
            max_segment_duration: Some(f64::NAN),
            ..DecoderConfig::default()
        };
        assert!(nan_duration.validate().is_err());

        let unbounded = DecoderConfig {
            max_segment_duration: None,
            ..DecoderConfig::default()
        };
        assert!(unbounded.validate().is_ok());
        assert!(unbounded.segment_duration_limit().is_infinite());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let json = r#"{ "beam_size": 8, "signature_length": null }"#;
        let config: DecoderConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.beam_size, 8);
        assert_eq!(config.signature_length, None);
        assert_eq!(config.max_branching_factor, 5);
        assert!((config.min_change_prob - 0.25).abs() < 1e-12);
    }

    #[test]
    fn load_reports_missing_file() {
        let result = DecoderConfig::load(Path::new("/nonexistent/harmony_config.json"));
        assert!(matches!(result, Err(DecodeError::Io { .. })));
    }
}
