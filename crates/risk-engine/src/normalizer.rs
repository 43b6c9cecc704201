//! Observation normalization
//!
//! Each category owns a piecewise-linear curve from its physical quantity to
//! a 0-100 score. Curves are tagged with their expected shape so a swapped-in
//! table is validated against the direction of severity:
//!
//! | Category      | Shape      | Worse when          |
//! |---------------|------------|---------------------|
//! | Temperature   | increasing | hotter              |
//! | AirQuality    | increasing | more NO₂            |
//! | Vegetation    | decreasing | lower NDVI          |
//! | Precipitation | U-shaped   | drought or flooding |
//!
//! Levels are derived from the score alone using closed-open thresholds, so a
//! score sitting exactly on a threshold belongs to the more severe level.

use crate::config::EngineConfig;
use crate::{Category, DataQuality, EngineError, Observation, Result, RiskAssessment, RiskLevel};
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: f64 = 100.0;

/// Score thresholds where each level begins (closed-open intervals)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub moderate: f64,
    pub high: f64,
    pub severe: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            moderate: 25.0,
            high: 50.0,
            severe: 75.0,
        }
    }
}

impl LevelThresholds {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.severe {
            RiskLevel::Severe
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 < self.moderate
            && self.moderate < self.high
            && self.high < self.severe
            && self.severe < MAX_SCORE;
        if !ordered {
            return Err(EngineError::InvalidConfig(format!(
                "level thresholds must satisfy 0 < moderate < high < severe < 100, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// One breakpoint of a score curve, written `[value, score]` in config files
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Knot {
    pub value: f64,
    pub score: f64,
}

impl From<[f64; 2]> for Knot {
    fn from([value, score]: [f64; 2]) -> Self {
        Self { value, score }
    }
}

impl From<Knot> for [f64; 2] {
    fn from(k: Knot) -> Self {
        [k.value, k.score]
    }
}

/// Piecewise-linear value-to-score mapping, clamped at both ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "knots", rename_all = "snake_case")]
pub enum ScoreCurve {
    Increasing(Vec<Knot>),
    Decreasing(Vec<Knot>),
    UShaped(Vec<Knot>),
}

impl ScoreCurve {
    pub fn knots(&self) -> &[Knot] {
        match self {
            ScoreCurve::Increasing(k) | ScoreCurve::Decreasing(k) | ScoreCurve::UShaped(k) => k,
        }
    }

    /// Score for a canonical-unit value. Exactly on a knot yields the knot score.
    pub fn score(&self, value: f64) -> f64 {
        let knots = self.knots();
        let (first, last) = match (knots.first(), knots.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return 0.0,
        };
        if value <= first.value {
            return first.score;
        }
        if value >= last.value {
            return last.score;
        }

        // First knot strictly above value; 1 <= i < len here
        let i = knots.partition_point(|k| k.value <= value);
        let lo = knots[i - 1];
        let hi = knots[i];
        let t = (value - lo.value) / (hi.value - lo.value);
        let score = lo.score + t * (hi.score - lo.score);
        score.clamp(lo.score.min(hi.score), lo.score.max(hi.score))
    }

    pub fn validate(&self, category: Category) -> Result<()> {
        let knots = self.knots();
        let invalid = |msg: String| EngineError::InvalidConfig(format!("{} curve: {}", category, msg));

        if knots.len() < 2 {
            return Err(invalid(format!("need at least 2 knots, got {}", knots.len())));
        }
        for k in knots {
            if !k.value.is_finite() || !(0.0..=MAX_SCORE).contains(&k.score) {
                return Err(invalid(format!("knot [{}, {}] out of range", k.value, k.score)));
            }
        }
        if knots.windows(2).any(|w| w[1].value <= w[0].value) {
            return Err(invalid("knot values must be strictly ascending".to_string()));
        }

        let rising = |w: &[Knot]| w[1].score >= w[0].score;
        let falling = |w: &[Knot]| w[1].score <= w[0].score;
        let shape_ok = match self {
            ScoreCurve::Increasing(_) => knots.windows(2).all(rising),
            ScoreCurve::Decreasing(_) => knots.windows(2).all(falling),
            ScoreCurve::UShaped(_) => {
                // Non-increasing up to the minimum, non-decreasing after it
                let min_idx = knots
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                knots[..=min_idx].windows(2).all(falling) && knots[min_idx..].windows(2).all(rising)
            }
        };
        if !shape_ok {
            return Err(invalid("knot scores contradict the declared shape".to_string()));
        }
        Ok(())
    }
}

/// Normalization rule for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationRule {
    /// Physically plausible range in the canonical unit
    pub plausible_min: f64,
    pub plausible_max: f64,
    pub curve: ScoreCurve,
}

impl NormalizationRule {
    fn validate(&self, category: Category) -> Result<()> {
        if !(self.plausible_min < self.plausible_max) {
            return Err(EngineError::InvalidConfig(format!(
                "{} plausible range [{}, {}] is empty",
                category, self.plausible_min, self.plausible_max
            )));
        }
        self.curve.validate(category)
    }
}

fn knots(pairs: &[[f64; 2]]) -> Vec<Knot> {
    pairs.iter().copied().map(Knot::from).collect()
}

/// Urban-heat-island bands: <20 Low, 20-28 Moderate, 28-35 High, >=35 Severe
fn default_temperature() -> NormalizationRule {
    NormalizationRule {
        plausible_min: -90.0,
        plausible_max: 60.0,
        curve: ScoreCurve::Increasing(knots(&[
            [-90.0, 0.0],
            [20.0, 25.0],
            [28.0, 50.0],
            [35.0, 75.0],
            [50.0, 100.0],
        ])),
    }
}

/// NO₂ bands: <40 Low, 40-100 Moderate, 100-200 High, >=200 Severe
fn default_air_quality() -> NormalizationRule {
    NormalizationRule {
        plausible_min: 0.0,
        plausible_max: 2000.0,
        curve: ScoreCurve::Increasing(knots(&[
            [0.0, 0.0],
            [40.0, 25.0],
            [100.0, 50.0],
            [200.0, 75.0],
            [400.0, 100.0],
        ])),
    }
}

/// NDVI bands: >0.6 Low, 0.4-0.6 Moderate, 0.2-0.4 High, <=0.2 Severe
fn default_vegetation() -> NormalizationRule {
    NormalizationRule {
        plausible_min: -1.0,
        plausible_max: 1.0,
        curve: ScoreCurve::Decreasing(knots(&[
            [-1.0, 100.0],
            [0.2, 75.0],
            [0.4, 50.0],
            [0.6, 25.0],
            [1.0, 0.0],
        ])),
    }
}

/// Daily totals: dry spells score Moderate, 5-15 mm is neutral, >=25 mm climbs toward Severe
fn default_precipitation() -> NormalizationRule {
    NormalizationRule {
        plausible_min: 0.0,
        plausible_max: 1000.0,
        curve: ScoreCurve::UShaped(knots(&[
            [0.0, 35.0],
            [1.0, 10.0],
            [5.0, 0.0],
            [15.0, 0.0],
            [25.0, 25.0],
            [50.0, 50.0],
            [100.0, 75.0],
            [200.0, 100.0],
        ])),
    }
}

/// Per-category normalization rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationTable {
    pub temperature: NormalizationRule,
    pub air_quality: NormalizationRule,
    pub vegetation: NormalizationRule,
    pub precipitation: NormalizationRule,
}

impl Default for NormalizationTable {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            air_quality: default_air_quality(),
            vegetation: default_vegetation(),
            precipitation: default_precipitation(),
        }
    }
}

impl NormalizationTable {
    pub fn rule(&self, category: Category) -> &NormalizationRule {
        match category {
            Category::Temperature => &self.temperature,
            Category::AirQuality => &self.air_quality,
            Category::Vegetation => &self.vegetation,
            Category::Precipitation => &self.precipitation,
        }
    }

    pub fn validate(&self) -> Result<()> {
        Category::ALL
            .iter()
            .try_for_each(|c| self.rule(*c).validate(*c))
    }
}

/// Convert an observation value to its category's canonical unit
pub fn canonical_value(observation: &Observation) -> Result<f64> {
    let v = observation.value;
    let unit = observation.unit.trim().to_ascii_lowercase();
    let converted = match (observation.category, unit.as_str()) {
        (Category::Temperature, "°c" | "c" | "celsius" | "degc") => Some(v),
        (Category::Temperature, "k" | "kelvin") => Some(v - 273.15),
        (Category::Temperature, "°f" | "f" | "fahrenheit" | "degf") => Some((v - 32.0) * 5.0 / 9.0),
        (Category::AirQuality, "µg/m³" | "μg/m³" | "ug/m3" | "µg/m3") => Some(v),
        // NO₂ at 25 °C and 1 atm
        (Category::AirQuality, "ppb") => Some(v * 1.88),
        (Category::Vegetation, "ndvi" | "index" | "") => Some(v),
        (Category::Precipitation, "mm" | "mm/day" | "mm/d") => Some(v),
        (Category::Precipitation, "in" | "in/day" | "inch") => Some(v * 25.4),
        _ => None,
    };

    converted.ok_or_else(|| EngineError::InvalidObservation {
        category: observation.category,
        reason: format!("unsupported unit '{}'", observation.unit),
    })
}

/// Normalize one observation into a bounded risk assessment.
///
/// Fails with `InvalidObservation` on missing quality, an unsupported unit or
/// a value outside the category's plausible range; callers exclude the
/// category rather than fabricate a score.
pub fn normalize(observation: &Observation, config: &EngineConfig) -> Result<RiskAssessment> {
    let category = observation.category;
    let invalid = |reason: String| EngineError::InvalidObservation { category, reason };

    if observation.quality == DataQuality::Missing {
        return Err(invalid("data quality is missing".to_string()));
    }
    if !observation.value.is_finite() {
        return Err(invalid(format!("non-finite value {}", observation.value)));
    }

    let value = canonical_value(observation)?;
    let rule = config.normalization.rule(category);
    if value < rule.plausible_min || value > rule.plausible_max {
        return Err(invalid(format!(
            "{:.3} {} outside plausible range [{}, {}]",
            value,
            category.canonical_unit(),
            rule.plausible_min,
            rule.plausible_max
        )));
    }

    let score = rule.curve.score(value).clamp(0.0, MAX_SCORE);
    let level = config.levels.level_for(score);

    Ok(RiskAssessment {
        category,
        score,
        level,
        source_observation: observation.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinates;
    use chrono::{TimeZone, Utc};

    fn obs(category: Category, value: f64) -> Observation {
        let nyc = Coordinates::new(40.7128, -74.0060).unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap();
        Observation::new(category, nyc, ts, value)
    }

    fn level_of(category: Category, value: f64) -> RiskLevel {
        normalize(&obs(category, value), &EngineConfig::default()).unwrap().level
    }

    #[test]
    fn test_temperature_bands() {
        assert_eq!(level_of(Category::Temperature, 7.51), RiskLevel::Low);
        assert_eq!(level_of(Category::Temperature, 24.0), RiskLevel::Moderate);
        assert_eq!(level_of(Category::Temperature, 31.0), RiskLevel::High);
        assert_eq!(level_of(Category::Temperature, 38.0), RiskLevel::Severe);
    }

    #[test]
    fn test_band_edges_belong_to_higher_band() {
        assert_eq!(level_of(Category::Temperature, 20.0), RiskLevel::Moderate);
        assert_eq!(level_of(Category::Temperature, 28.0), RiskLevel::High);
        assert_eq!(level_of(Category::Temperature, 35.0), RiskLevel::Severe);
        assert_eq!(level_of(Category::Temperature, 27.999), RiskLevel::Moderate);

        // Inverted curve: the edge value is the more severe side
        assert_eq!(level_of(Category::Vegetation, 0.4), RiskLevel::High);
        assert_eq!(level_of(Category::Vegetation, 0.41), RiskLevel::Moderate);
    }

    #[test]
    fn test_edge_score_is_exact() {
        let a = normalize(&obs(Category::Temperature, 28.0), &EngineConfig::default()).unwrap();
        assert_eq!(a.score, 50.0);
    }

    #[test]
    fn test_temperature_interpolates_within_band() {
        let a = normalize(&obs(Category::Temperature, 24.0), &EngineConfig::default()).unwrap();
        assert!((a.score - 37.5).abs() < 1e-9, "score {}", a.score);
    }

    #[test]
    fn test_vegetation_inverted() {
        let config = EngineConfig::default();
        let dense = normalize(&obs(Category::Vegetation, 0.8), &config).unwrap();
        let bare = normalize(&obs(Category::Vegetation, 0.05), &config).unwrap();
        assert!(dense.score < bare.score);
        assert_eq!(dense.level, RiskLevel::Low);
        assert_eq!(bare.level, RiskLevel::Severe);
    }

    #[test]
    fn test_precipitation_u_shape() {
        let config = EngineConfig::default();
        let dry = normalize(&obs(Category::Precipitation, 0.0), &config).unwrap();
        let normal = normalize(&obs(Category::Precipitation, 8.0), &config).unwrap();
        let flood = normalize(&obs(Category::Precipitation, 120.0), &config).unwrap();
        assert!(dry.score > normal.score);
        assert!(flood.score > normal.score);
        assert_eq!(normal.level, RiskLevel::Low);
        assert_eq!(flood.level, RiskLevel::Severe);
    }

    #[test]
    fn test_air_quality_increasing() {
        assert_eq!(level_of(Category::AirQuality, 12.0), RiskLevel::Low);
        assert_eq!(level_of(Category::AirQuality, 100.0), RiskLevel::High);
        assert_eq!(level_of(Category::AirQuality, 450.0), RiskLevel::Severe);
    }

    #[test]
    fn test_missing_quality_rejected() {
        let o = obs(Category::Temperature, 22.0).with_quality(DataQuality::Missing);
        let err = normalize(&o, &EngineConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidObservation { category: Category::Temperature, .. }
        ));
    }

    #[test]
    fn test_implausible_values_rejected() {
        let config = EngineConfig::default();
        assert!(normalize(&obs(Category::Temperature, 75.0), &config).is_err());
        assert!(normalize(&obs(Category::Vegetation, 1.5), &config).is_err());
        assert!(normalize(&obs(Category::Precipitation, -2.0), &config).is_err());
        assert!(normalize(&obs(Category::AirQuality, f64::NAN), &config).is_err());
    }

    #[test]
    fn test_unit_conversion() {
        let config = EngineConfig::default();
        let kelvin = obs(Category::Temperature, 301.15).with_unit("K");
        let a = normalize(&kelvin, &config).unwrap();
        assert!((a.score - 50.0).abs() < 1e-9);

        let fahrenheit = obs(Category::Temperature, 86.0).with_unit("°F");
        assert_eq!(normalize(&fahrenheit, &config).unwrap().level, RiskLevel::High);

        let bogus = obs(Category::Precipitation, 3.0).with_unit("furlongs");
        assert!(normalize(&bogus, &config).is_err());
    }

    #[test]
    fn test_normalize_idempotent() {
        let config = EngineConfig::default();
        let o = obs(Category::AirQuality, 73.2);
        assert_eq!(normalize(&o, &config).unwrap(), normalize(&o, &config).unwrap());
    }

    #[test]
    fn test_curve_shape_validation() {
        let bad = ScoreCurve::Increasing(knots(&[[0.0, 50.0], [1.0, 10.0]]));
        assert!(bad.validate(Category::Temperature).is_err());

        let not_u = ScoreCurve::UShaped(knots(&[[0.0, 10.0], [1.0, 50.0], [2.0, 5.0]]));
        assert!(not_u.validate(Category::Precipitation).is_err());

        let unordered = ScoreCurve::Decreasing(knots(&[[1.0, 50.0], [0.0, 10.0]]));
        assert!(unordered.validate(Category::Vegetation).is_err());

        assert!(NormalizationTable::default().validate().is_ok());
    }

    #[test]
    fn test_empty_plausible_range_rejected() {
        let mut table = NormalizationTable::default();
        table.temperature.plausible_min = 60.0;
        table.temperature.plausible_max = -90.0;
        assert!(matches!(table.validate(), Err(EngineError::InvalidConfig(_))));

        table.temperature.plausible_min = 20.0;
        table.temperature.plausible_max = 20.0;
        assert!(table.validate().is_err());

        let mut table = NormalizationTable::default();
        table.precipitation.plausible_min = f64::NAN;
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_curve_serde_shape() {
        let json = r#"{"shape":"decreasing","knots":[[0.0,100.0],[1.0,0.0]]}"#;
        let curve: ScoreCurve = serde_json::from_str(json).unwrap();
        assert!(matches!(curve, ScoreCurve::Decreasing(ref k) if k.len() == 2));
        assert_eq!(curve.score(0.5), 50.0);
    }
}
