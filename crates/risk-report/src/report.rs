//! Report building and GeoJSON export

use crate::loader::LoadedObservations;
use crate::Result;
use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use risk_engine::context::round_one_decimal;
use risk_engine::{
    AssessmentTarget, Category, CompositeAssessment, ContextPayload, Coordinates, EngineError, Polygon, RiskEngine,
    RiskLevel,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Per-location scores for map layers and summaries
#[derive(Debug, Clone, Serialize)]
pub struct LocationSummary {
    pub coordinates: Coordinates,
    pub overall_score: f64,
    pub overall_level: RiskLevel,
    pub scores: BTreeMap<Category, f64>,
}

impl LocationSummary {
    fn from_composite(coordinates: Coordinates, composite: &CompositeAssessment) -> Self {
        Self {
            coordinates,
            overall_score: composite.overall_score(),
            overall_level: composite.overall_level(),
            scores: composite.per_category().iter().map(|(c, a)| (*c, a.score)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    pub payloads: Vec<ContextPayload>,
    pub locations: Vec<LocationSummary>,
    /// Locations with no usable category
    pub skipped_locations: Vec<Coordinates>,
    pub skipped_records: usize,
}

fn point_coordinates(composite: &CompositeAssessment) -> Option<Coordinates> {
    match composite.target() {
        AssessmentTarget::Point { coordinates } => Some(*coordinates),
        AssessmentTarget::Area { .. } => None,
    }
}

/// One payload per location
pub fn build_point_report(engine: &RiskEngine, input: LoadedObservations) -> Result<RiskReport> {
    let mut payloads = Vec::new();
    let mut locations = Vec::new();
    let mut skipped_locations = Vec::new();

    for (coordinates, observations) in input.locations {
        match engine.assess_point(coordinates, observations, &Category::ALL) {
            Ok(analysis) => {
                locations.push(LocationSummary::from_composite(coordinates, &analysis.composite));
                payloads.push(engine.payload_for_point(&analysis));
            }
            Err(EngineError::InsufficientData(reason)) => {
                warn!("Skipping location: {}", reason);
                skipped_locations.push(coordinates);
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Point report: {} locations assessed, {} skipped",
        payloads.len(),
        skipped_locations.len()
    );

    Ok(RiskReport {
        generated_at: Utc::now(),
        area_id: None,
        payloads,
        locations,
        skipped_locations,
        skipped_records: input.skipped,
    })
}

/// Treat every location as a sample point of one area. Needs at least three
/// distinct locations to form the area polygon.
pub fn build_area_report(engine: &RiskEngine, area_id: &str, input: LoadedObservations) -> Result<RiskReport> {
    let vertices: Vec<Coordinates> = input.locations.iter().map(|(c, _)| *c).collect();
    let polygon = Polygon::new(vertices)?;

    let area = engine.assess_area(area_id, &polygon, input.locations, &Category::ALL)?;
    let payload = engine.payload_for_area(&area);

    let locations = area
        .points
        .iter()
        .filter_map(|p| point_coordinates(&p.composite).map(|c| LocationSummary::from_composite(c, &p.composite)))
        .collect();

    Ok(RiskReport {
        generated_at: Utc::now(),
        area_id: Some(area_id.to_string()),
        payloads: vec![payload],
        locations,
        skipped_locations: area.skipped_points,
        skipped_records: input.skipped,
    })
}

/// One Point feature per assessed location
pub fn to_geojson(report: &RiskReport) -> FeatureCollection {
    let features = report
        .locations
        .iter()
        .map(|loc| {
            let mut properties = JsonObject::new();
            properties.insert("overall_score".to_string(), round_one_decimal(loc.overall_score).into());
            properties.insert("overall_level".to_string(), loc.overall_level.as_str().into());
            for (category, score) in &loc.scores {
                properties.insert(format!("{}_score", category), round_one_decimal(*score).into());
            }
            if let Some(area_id) = &report.area_id {
                properties.insert("area_id".to_string(), area_id.clone().into());
            }

            Feature {
                bbox: None,
                // GeoJSON positions are [lng, lat]
                geometry: Some(Geometry::new(Value::Point(vec![
                    loc.coordinates.lng(),
                    loc.coordinates.lat(),
                ]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use risk_engine::Observation;

    fn obs(category: Category, lat: f64, lng: f64, value: f64) -> Observation {
        let ts = Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap();
        Observation::new(category, Coordinates::new(lat, lng).unwrap(), ts, value)
    }

    fn input() -> LoadedObservations {
        let points = [(40.70, -74.02), (40.70, -74.00), (40.72, -74.00), (40.72, -74.02)];
        LoadedObservations {
            locations: points
                .iter()
                .map(|&(lat, lng)| {
                    (
                        Coordinates::new(lat, lng).unwrap(),
                        vec![
                            obs(Category::Temperature, lat, lng, 33.0),
                            obs(Category::Vegetation, lat, lng, 0.5),
                        ],
                    )
                })
                .collect(),
            skipped: 2,
        }
    }

    #[test]
    fn test_point_report() {
        let mut input = input();
        input.locations.push((Coordinates::new(1.0, 1.0).unwrap(), Vec::new()));

        let report = build_point_report(&RiskEngine::default(), input).unwrap();
        assert_eq!(report.payloads.len(), 4);
        assert_eq!(report.locations.len(), 4);
        assert_eq!(report.skipped_locations.len(), 1);
        assert_eq!(report.skipped_records, 2);
        // (67.9 + 37.5) / 2
        assert_eq!(report.locations[0].overall_level, RiskLevel::High);
    }

    #[test]
    fn test_area_report() {
        let report = build_area_report(&RiskEngine::default(), "test-block", input()).unwrap();
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(report.locations.len(), 4);
        let payload = &report.payloads[0];
        assert!(matches!(payload.target, AssessmentTarget::Area { sample_count: 4, .. }));
        // Uniform samples: the area matches each point
        assert_eq!(payload.ml_analysis.overall_level, report.locations[0].overall_level);
        assert_eq!(payload.ml_analysis.overall_level, RiskLevel::High);
    }

    #[test]
    fn test_area_needs_three_locations() {
        let mut input = input();
        input.locations.truncate(2);
        assert!(build_area_report(&RiskEngine::default(), "line", input).is_err());
    }

    #[test]
    fn test_geojson_features() {
        let report = build_point_report(&RiskEngine::default(), input()).unwrap();
        let collection = to_geojson(&report);
        assert_eq!(collection.features.len(), 4);

        let json = serde_json::to_value(&collection).unwrap();
        let first = &json["features"][0];
        assert_eq!(first["geometry"]["type"], "Point");
        assert_eq!(first["geometry"]["coordinates"], serde_json::json!([-74.02, 40.70]));
        assert_eq!(first["properties"]["overall_level"], "High");
        assert!(first["properties"]["temperature_score"].is_number());
        assert!(first["properties"].get("air_quality_score").is_none());
    }
}
