//! Context payload for downstream conversational services.
//!
//! Pure structuring: no scoring decisions are made here. Scores are kept at
//! full precision in memory and rounded to one decimal only when serialized.

use crate::aggregator::{AssessmentTarget, CompositeAssessment};
use crate::normalizer::canonical_value;
use crate::recommendations::Recommendation;
use crate::{Category, Coordinates, DataQuality, Observation, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Round half away from zero to one decimal place
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn one_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_one_decimal(*value))
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Category-specific fields of an observation record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Readings {
    Temperature {
        temperature_celsius: f64,
        temperature_fahrenheit: f64,
        heat_risk: Option<RiskLevel>,
    },
    AirQuality {
        no2_concentration: f64,
        health_risk: Option<RiskLevel>,
    },
    Vegetation {
        ndvi: f64,
        vegetation_risk: Option<RiskLevel>,
    },
    Precipitation {
        precipitation_mm: f64,
        flood_risk: Option<RiskLevel>,
    },
}

/// Observation-shaped record as exposed at the API boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub source: String,
    pub category: Category,
    pub coordinates: Coordinates,
    pub date: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub readings: Readings,
    pub unit: String,
    pub data_quality: DataQuality,
    pub resolution: String,
    pub latency: String,
}

impl ObservationRecord {
    /// Build a record. `risk` is `None` when the observation was excluded.
    pub fn new(observation: &Observation, risk: Option<RiskLevel>) -> Self {
        // Unconvertible units fall back to the raw value; such observations carry no risk label
        let value = canonical_value(observation).unwrap_or(observation.value);
        let readings = match observation.category {
            Category::Temperature => Readings::Temperature {
                temperature_celsius: value,
                temperature_fahrenheit: celsius_to_fahrenheit(value),
                heat_risk: risk,
            },
            Category::AirQuality => Readings::AirQuality {
                no2_concentration: value,
                health_risk: risk,
            },
            Category::Vegetation => Readings::Vegetation {
                ndvi: value,
                vegetation_risk: risk,
            },
            Category::Precipitation => Readings::Precipitation {
                precipitation_mm: value,
                flood_risk: risk,
            },
        };

        Self {
            source: observation.source.clone(),
            category: observation.category,
            coordinates: observation.coordinates,
            date: observation.timestamp.format("%Y-%m-%d").to_string(),
            timestamp: observation.timestamp,
            readings,
            unit: observation.unit.clone(),
            data_quality: observation.quality,
            resolution: observation.resolution.clone(),
            latency: observation.latency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRisk {
    #[serde(serialize_with = "one_decimal")]
    pub score: f64,
    pub level: RiskLevel,
    #[serde(serialize_with = "one_decimal")]
    pub contribution: f64,
}

/// Per-category risks keyed `heat_risk`, `air_quality_risk`, `vegetation_risk`, `flood_risk`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MlAnalysis {
    #[serde(flatten)]
    pub risks: BTreeMap<&'static str, CategoryRisk>,
    #[serde(serialize_with = "one_decimal")]
    pub overall_risk_score: f64,
    pub overall_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    pub target: AssessmentTarget,
    pub generated_at: DateTime<Utc>,
    pub nasa_data: Vec<ObservationRecord>,
    pub ml_analysis: MlAnalysis,
    pub recommendations: Vec<Recommendation>,
    pub missing_categories: Vec<Category>,
}

/// Package observations, the composite and its recommendations.
///
/// An observation gets a risk label only if it is the source observation of
/// the composite's assessment for its category.
pub fn assemble(
    observations: &[Observation],
    composite: &CompositeAssessment,
    recommendations: Vec<Recommendation>,
) -> ContextPayload {
    let nasa_data = observations
        .iter()
        .map(|obs| {
            let risk = composite
                .assessment(obs.category)
                .filter(|a| a.source_observation == *obs)
                .map(|a| a.level);
            ObservationRecord::new(obs, risk)
        })
        .collect();

    let risks = composite
        .per_category()
        .iter()
        .map(|(category, a)| {
            (
                category.risk_key(),
                CategoryRisk {
                    score: a.score,
                    level: a.level,
                    contribution: composite.contribution(*category),
                },
            )
        })
        .collect();

    ContextPayload {
        target: composite.target().clone(),
        generated_at: composite.generated_at(),
        nasa_data,
        ml_analysis: MlAnalysis {
            risks,
            overall_risk_score: composite.overall_score(),
            overall_level: composite.overall_level(),
        },
        recommendations,
        missing_categories: composite.missing_categories().to_vec(),
    }
}

impl ContextPayload {
    /// Compact plain-text summary used as grounding for conversational answers
    pub fn grounding_text(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Location: {}", self.target.label());
        let _ = writeln!(
            text,
            "Overall environmental risk: {:.1}/100 ({})",
            self.ml_analysis.overall_risk_score, self.ml_analysis.overall_level
        );

        for record in &self.nasa_data {
            let line = match &record.readings {
                Readings::Temperature { temperature_celsius, temperature_fahrenheit, heat_risk } => format!(
                    "Surface temperature {:.1}°C ({:.1}°F), heat risk {}",
                    temperature_celsius, temperature_fahrenheit, label(heat_risk)
                ),
                Readings::AirQuality { no2_concentration, health_risk } => format!(
                    "NO₂ concentration {:.1} µg/m³, health risk {}",
                    no2_concentration, label(health_risk)
                ),
                Readings::Vegetation { ndvi, vegetation_risk } => {
                    format!("NDVI {:.2}, vegetation risk {}", ndvi, label(vegetation_risk))
                }
                Readings::Precipitation { precipitation_mm, flood_risk } => format!(
                    "Precipitation {:.1} mm/day, flood risk {}",
                    precipitation_mm, label(flood_risk)
                ),
            };
            let _ = writeln!(text, "- {} [{}, {}]", line, record.source, record.date);
        }

        if !self.missing_categories.is_empty() {
            let missing: Vec<&str> = self.missing_categories.iter().map(|c| c.as_str()).collect();
            let _ = writeln!(text, "Unavailable data: {}", missing.join(", "));
        }

        if self.recommendations.is_empty() {
            let _ = writeln!(text, "No mitigation actions required at current risk levels.");
        } else {
            let _ = writeln!(text, "Recommendations:");
            for (i, rec) in self.recommendations.iter().take(5).enumerate() {
                let _ = writeln!(
                    text,
                    "{}. {} ({:?} priority, {}): {} Impact: {}. Cost: {:?}. Timeline: {}.",
                    i + 1,
                    rec.title,
                    rec.priority,
                    rec.category,
                    rec.description,
                    rec.impact_estimate,
                    rec.cost_tier,
                    rec.timeline_estimate
                );
            }
        }
        text
    }
}

fn label(risk: &Option<RiskLevel>) -> &'static str {
    risk.map(|r| r.as_str()).unwrap_or("unavailable")
}
