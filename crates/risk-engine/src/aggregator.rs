//! Composite assessment
//!
//! ```text
//! overall = Σ w_c·s_c / Σ w_c      (c over present categories only)
//! contribution(c) = w_c·s_c / Σ w_c
//! ```
//!
//! Omitting a category renormalizes the remaining weights, so the overall
//! score stays in [0, 100] for any subset. Iteration runs over a `BTreeMap`
//! in category order, which keeps the floating-point summation order and
//! therefore the result bit-identical for identical inputs.

use crate::config::EngineConfig;
use crate::normalizer::canonical_value;
use crate::{
    Category, Coordinates, DataQuality, EngineError, Observation, Result, RiskAssessment, RiskLevel,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Weight given to categories a config leaves unspecified (equal weighting)
pub const DEFAULT_WEIGHT: f64 = 0.25;

/// Category weights. Only relative magnitudes matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryWeights(BTreeMap<Category, f64>);

impl Default for CategoryWeights {
    fn default() -> Self {
        Self(Category::ALL.iter().map(|c| (*c, DEFAULT_WEIGHT)).collect())
    }
}

impl CategoryWeights {
    pub fn new(weights: impl IntoIterator<Item = (Category, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn weight(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn validate(&self) -> Result<()> {
        for (category, w) in &self.0 {
            if !w.is_finite() || *w <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "weight for {} must be a positive number, got {}",
                    category, w
                )));
            }
        }
        Ok(())
    }
}

/// What a composite describes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssessmentTarget {
    Point {
        coordinates: Coordinates,
    },
    Area {
        area_id: String,
        centroid: Coordinates,
        sample_count: usize,
    },
}

impl AssessmentTarget {
    pub fn label(&self) -> String {
        match self {
            AssessmentTarget::Point { coordinates } => {
                format!("({:.4}, {:.4})", coordinates.lat(), coordinates.lng())
            }
            AssessmentTarget::Area { area_id, .. } => format!("area '{}'", area_id),
        }
    }
}

/// Multi-category risk profile for a point or an area.
///
/// Only constructible through [`aggregate`] or [`aggregate_area`], which
/// refuse to build one with no present category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeAssessment {
    target: AssessmentTarget,
    per_category: BTreeMap<Category, RiskAssessment>,
    contributions: BTreeMap<Category, f64>,
    overall_score: f64,
    overall_level: RiskLevel,
    missing_categories: Vec<Category>,
    generated_at: DateTime<Utc>,
}

impl CompositeAssessment {
    pub fn target(&self) -> &AssessmentTarget {
        &self.target
    }

    pub fn per_category(&self) -> &BTreeMap<Category, RiskAssessment> {
        &self.per_category
    }

    pub fn assessment(&self, category: Category) -> Option<&RiskAssessment> {
        self.per_category.get(&category)
    }

    /// Share of the overall score contributed by a category (0 if absent)
    pub fn contribution(&self, category: Category) -> f64 {
        self.contributions.get(&category).copied().unwrap_or(0.0)
    }

    pub fn contributions(&self) -> &BTreeMap<Category, f64> {
        &self.contributions
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    pub fn overall_level(&self) -> RiskLevel {
        self.overall_level
    }

    /// Requested categories with no usable assessment
    pub fn missing_categories(&self) -> &[Category] {
        &self.missing_categories
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Combine per-category assessments for one location.
///
/// `requested` lists the categories the caller asked for; those without an
/// assessment are reported in `missing_categories`. When two assessments
/// share a category, the one from the newer observation is kept (higher
/// score on equal timestamps), independent of input order.
pub fn aggregate(
    target: AssessmentTarget,
    assessments: impl IntoIterator<Item = RiskAssessment>,
    requested: &[Category],
    config: &EngineConfig,
) -> Result<CompositeAssessment> {
    let mut per_category: BTreeMap<Category, RiskAssessment> = BTreeMap::new();
    for a in assessments {
        match per_category.get(&a.category) {
            Some(existing) if !supersedes(&a, existing) => {}
            _ => {
                per_category.insert(a.category, a);
            }
        }
    }
    build(target, per_category, requested, config)
}

fn supersedes(candidate: &RiskAssessment, existing: &RiskAssessment) -> bool {
    let (new_ts, old_ts) = (
        candidate.source_observation.timestamp,
        existing.source_observation.timestamp,
    );
    new_ts > old_ts || (new_ts == old_ts && candidate.score > existing.score)
}

/// Reduce per-point composites into one area-level composite.
///
/// Each category's area score is the equal-weight mean of the point scores
/// where that category is present; the overall score then follows the same
/// category-weighted rule as a single point.
pub fn aggregate_area(
    area_id: &str,
    centroid: Coordinates,
    points: &[CompositeAssessment],
    requested: &[Category],
    config: &EngineConfig,
) -> Result<CompositeAssessment> {
    let target = AssessmentTarget::Area {
        area_id: area_id.to_string(),
        centroid,
        sample_count: points.len(),
    };

    let mut per_category = BTreeMap::new();
    for category in Category::ALL {
        let present: Vec<&RiskAssessment> =
            points.iter().filter_map(|p| p.assessment(category)).collect();
        if present.is_empty() {
            continue;
        }

        let score = running_mean(present.iter().map(|a| a.score));
        let observation = representative_observation(category, centroid, &present, points.len());
        per_category.insert(
            category,
            RiskAssessment {
                category,
                score,
                level: config.levels.level_for(score),
                source_observation: observation,
            },
        );
    }

    build(target, per_category, requested, config)
}

/// Incremental mean. A run of identical values yields that value exactly.
fn running_mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut mean = 0.0;
    for (i, v) in values.enumerate() {
        mean += (v - mean) / (i + 1) as f64;
    }
    mean
}

/// Synthesized area observation: mean canonical-unit value at the centroid, latest
/// timestamp, worst quality of the contributing points.
fn representative_observation(
    category: Category,
    centroid: Coordinates,
    present: &[&RiskAssessment],
    sample_count: usize,
) -> Observation {
    let first = &present[0].source_observation;
    let timestamp = present
        .iter()
        .map(|a| a.source_observation.timestamp)
        .max()
        .unwrap_or(first.timestamp);
    let quality = present
        .iter()
        .map(|a| a.source_observation.quality)
        .max()
        .unwrap_or(DataQuality::High);

    Observation {
        category,
        coordinates: centroid,
        timestamp,
        value: running_mean(present.iter().map(|a| {
            // Already normalized, so the unit is known
            canonical_value(&a.source_observation).unwrap_or(a.source_observation.value)
        })),
        unit: category.canonical_unit().to_string(),
        quality,
        resolution: format!("area mean of {}/{} sample points", present.len(), sample_count),
        latency: first.latency.clone(),
        source: first.source.clone(),
    }
}

fn build(
    target: AssessmentTarget,
    per_category: BTreeMap<Category, RiskAssessment>,
    requested: &[Category],
    config: &EngineConfig,
) -> Result<CompositeAssessment> {
    if per_category.is_empty() {
        return Err(EngineError::InsufficientData(target.label()));
    }

    let total_weight: f64 = per_category
        .keys()
        .map(|c| config.weights.weight(*c))
        .sum();

    let contributions: BTreeMap<Category, f64> = per_category
        .iter()
        .map(|(c, a)| (*c, config.weights.weight(*c) * a.score / total_weight))
        .collect();

    let overall_score = contributions.values().sum::<f64>().clamp(0.0, 100.0);
    let overall_level = config.levels.level_for(overall_score);

    let mut missing_categories: Vec<Category> = requested
        .iter()
        .copied()
        .filter(|c| !per_category.contains_key(c))
        .collect();
    missing_categories.sort();
    missing_categories.dedup();

    debug!(
        "Aggregated {}: overall={:.2} ({}) from {} categories, missing={:?}",
        target.label(),
        overall_score,
        overall_level,
        per_category.len(),
        missing_categories
    );

    Ok(CompositeAssessment {
        target,
        per_category,
        contributions,
        overall_score,
        overall_level,
        missing_categories,
        generated_at: Utc::now(),
    })
}
