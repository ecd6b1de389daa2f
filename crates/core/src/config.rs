use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunable reconciliation policy. Every field has a default, so an empty
/// file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub matching: MatchingConfig,
    pub quantity: QuantityConfig,
    pub drift: DriftConfig,
    pub approval: ApprovalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub overlap_weight: f64,
    pub containment_weight: f64,
    /// Jaro-Winkler similarity at which two different tokens still overlap.
    pub fuzzy_token_floor: f64,
    pub confident_threshold: u8,
    pub review_threshold: u8,
    pub suggestion_limit: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            overlap_weight: 0.7,
            containment_weight: 0.3,
            fuzzy_token_floor: 0.85,
            confident_threshold: 80,
            review_threshold: 1,
            suggestion_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantityConfig {
    pub tolerance: Decimal,
}

impl Default for QuantityConfig {
    fn default() -> Self {
        Self { tolerance: Decimal::new(1, 2) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub tolerance: Decimal,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self { tolerance: Decimal::new(2, 2) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub timeout_ms: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl ReconcileConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: ReconcileConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matching;
        for (name, w) in [
            ("overlap_weight", m.overlap_weight),
            ("containment_weight", m.containment_weight),
            ("fuzzy_token_floor", m.fuzzy_token_floor),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::Invalid(format!("matching.{name} must be within [0, 1], got {w}")));
            }
        }
        if m.overlap_weight + m.containment_weight > 1.0 + f64::EPSILON {
            return Err(ConfigError::Invalid(
                "matching weights must not sum above 1".to_string(),
            ));
        }
        if m.confident_threshold > 100 || m.review_threshold > m.confident_threshold {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy review ({}) <= confident ({}) <= 100",
                m.review_threshold, m.confident_threshold
            )));
        }
        if m.suggestion_limit == 0 {
            return Err(ConfigError::Invalid("matching.suggestion_limit must be positive".to_string()));
        }
        if self.quantity.tolerance.is_sign_negative() || self.drift.tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid("tolerances must not be negative".to_string()));
        }
        if self.approval.timeout_ms == 0 {
            return Err(ConfigError::Invalid("approval.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ReconcileConfig::from_toml("").unwrap();
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.matching.confident_threshold, 80);
        assert_eq!(config.drift.tolerance, Decimal::new(2, 2));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ReconcileConfig::from_toml(
            r#"
            [matching]
            confident_threshold = 90

            [drift]
            tolerance = 0.05
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.confident_threshold, 90);
        assert_eq!(config.matching.overlap_weight, 0.7);
        assert_eq!(config.drift.tolerance, Decimal::new(5, 2));
        assert_eq!(config.approval.timeout_ms, 5_000);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = ReconcileConfig::from_toml(
            "[matching]\nconfident_threshold = 40\nreview_threshold = 50\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_weights_out_of_range() {
        let err = ReconcileConfig::from_toml("[matching]\noverlap_weight = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            ReconcileConfig::from_toml("[matching"),
            Err(ConfigError::Parse(_))
        ));
    }
}
