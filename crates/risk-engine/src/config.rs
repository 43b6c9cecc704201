//! Engine configuration: level thresholds, normalization curves, category
//! weights and the recommendation table.
//!
//! Every section is optional in a JSON override file; omitted sections keep
//! their built-in defaults.
//!
//! ```json
//! {
//!   "weights": { "temperature": 0.4, "air_quality": 0.3 },
//!   "levels": { "moderate": 20.0, "high": 45.0, "severe": 70.0 }
//! }
//! ```

use crate::aggregator::CategoryWeights;
use crate::normalizer::{LevelThresholds, NormalizationTable};
use crate::recommendations::{default_rules, RecommendationRule};
use crate::{EngineError, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub levels: LevelThresholds,
    pub normalization: NormalizationTable,
    pub weights: CategoryWeights,
    pub rules: Vec<RecommendationRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            levels: LevelThresholds::default(),
            normalization: NormalizationTable::default(),
            weights: CategoryWeights::default(),
            rules: default_rules(),
        }
    }
}

impl EngineConfig {
    /// Load and validate an override file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading engine configuration from {:?}", path);

        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;

        info!(
            "Engine configuration loaded: {} recommendation rules",
            config.rules.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.levels.validate()?;
        self.normalization.validate()?;
        self.weights.validate()?;

        for rule in &self.rules {
            // A Low threshold would make recommendations fire on every assessment
            if rule.min_level == RiskLevel::Low {
                return Err(EngineError::InvalidConfig(format!(
                    "rule '{}' must require at least Moderate risk",
                    rule.title
                )));
            }
            if !rule.impact_scale.is_finite() || rule.impact_scale < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "rule '{}' has invalid impact_scale {}",
                    rule.title, rule.impact_scale
                )));
            }
        }
        Ok(())
    }
}
