//! RiskEngine facade tying the pipeline stages together for point and area
//! queries.

use crate::aggregator::{aggregate, aggregate_area, AssessmentTarget, CompositeAssessment};
use crate::config::EngineConfig;
use crate::context::{assemble, ContextPayload};
use crate::geometry::{Coordinates, Polygon};
use crate::normalizer::normalize;
use crate::recommendations::{recommend, Recommendation};
use crate::{Category, EngineError, Observation, Result, RiskAssessment};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Observation rejected by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedObservation {
    pub category: Category,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PointAnalysis {
    pub composite: CompositeAssessment,
    /// Every input observation, excluded ones included
    pub observations: Vec<Observation>,
    pub excluded: Vec<ExcludedObservation>,
}

#[derive(Debug, Clone)]
pub struct AreaAnalysis {
    pub composite: CompositeAssessment,
    pub points: Vec<PointAnalysis>,
    /// Sample points with no usable category
    pub skipped_points: Vec<Coordinates>,
}

impl AreaAnalysis {
    /// Area-level representative observations, one per present category
    pub fn observations(&self) -> Vec<Observation> {
        self.composite
            .per_category()
            .values()
            .map(|a| a.source_observation.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: EngineConfig,
}

impl RiskEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn normalize(&self, observation: &Observation) -> Result<RiskAssessment> {
        normalize(observation, &self.config)
    }

    /// Assess a single location.
    ///
    /// Observations the normalizer rejects are excluded and their category is
    /// reported missing; only zero usable categories is an error.
    pub fn assess_point(
        &self,
        coordinates: Coordinates,
        observations: Vec<Observation>,
        requested: &[Category],
    ) -> Result<PointAnalysis> {
        let mut assessments = Vec::with_capacity(observations.len());
        let mut excluded = Vec::new();

        for obs in &observations {
            match self.normalize(obs) {
                Ok(a) => assessments.push(a),
                Err(EngineError::InvalidObservation { category, reason }) => {
                    warn!(
                        "Excluding {} observation at {}: {}",
                        category,
                        coordinates.cache_key(),
                        reason
                    );
                    excluded.push(ExcludedObservation { category, reason });
                }
                Err(e) => return Err(e),
            }
        }

        let composite = aggregate(
            AssessmentTarget::Point { coordinates },
            assessments,
            requested,
            &self.config,
        )?;

        Ok(PointAnalysis {
            composite,
            observations,
            excluded,
        })
    }

    /// Assess an area from per-sample-point observations.
    ///
    /// `samples` normally follows `polygon.sample_points()`. Points without
    /// any usable category are skipped; the area fails only when every point
    /// is skipped.
    pub fn assess_area(
        &self,
        area_id: &str,
        polygon: &Polygon,
        samples: Vec<(Coordinates, Vec<Observation>)>,
        requested: &[Category],
    ) -> Result<AreaAnalysis> {
        let total = samples.len();
        let mut points = Vec::with_capacity(total);
        let mut skipped_points = Vec::new();

        for (coordinates, observations) in samples {
            match self.assess_point(coordinates, observations, requested) {
                Ok(point) => points.push(point),
                Err(EngineError::InsufficientData(_)) => {
                    debug!("Skipping sample point {} of area '{}'", coordinates.cache_key(), area_id);
                    skipped_points.push(coordinates);
                }
                Err(e) => return Err(e),
            }
        }

        let composites: Vec<CompositeAssessment> = points.iter().map(|p| p.composite.clone()).collect();
        let composite = aggregate_area(area_id, polygon.centroid(), &composites, requested, &self.config)?;

        info!(
            "Area '{}' assessed: overall={:.1} ({}), {}/{} sample points usable",
            area_id,
            composite.overall_score(),
            composite.overall_level(),
            points.len(),
            total
        );

        Ok(AreaAnalysis {
            composite,
            points,
            skipped_points,
        })
    }

    pub fn recommend(&self, composite: &CompositeAssessment) -> Vec<Recommendation> {
        recommend(composite, &self.config.rules)
    }

    pub fn payload_for_point(&self, analysis: &PointAnalysis) -> ContextPayload {
        let recommendations = self.recommend(&analysis.composite);
        assemble(&analysis.observations, &analysis.composite, recommendations)
    }

    pub fn payload_for_area(&self, analysis: &AreaAnalysis) -> ContextPayload {
        let recommendations = self.recommend(&analysis.composite);
        assemble(&analysis.observations(), &analysis.composite, recommendations)
    }
}
