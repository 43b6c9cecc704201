//! Environmental Risk Engine
//!
//! Converts already-parsed geophysical observations into a normalized,
//! multi-category risk profile, a composite score and a ranked list of
//! mitigation recommendations.
//!
//! # Pipeline
//!
//! ```text
//! Observation ─normalize─▶ RiskAssessment ─aggregate─▶ CompositeAssessment
//!                                                          │
//!                              ContextPayload ◀─assemble─ recommend
//! ```
//!
//! | Category      | Quantity      | Severity direction  |
//! |---------------|---------------|---------------------|
//! | Temperature   | surface °C    | higher is worse     |
//! | AirQuality    | NO₂ µg/m³     | higher is worse     |
//! | Vegetation    | NDVI          | lower is worse      |
//! | Precipitation | mm/day        | both extremes worse |
//!
//! Every stage is synchronous and stateless. Fetching, caching and
//! transport live outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod aggregator;
pub mod config;
pub mod context;
pub mod engine;
pub mod geometry;
pub mod normalizer;
pub mod recommendations;

pub use aggregator::{AssessmentTarget, CategoryWeights, CompositeAssessment};
pub use config::EngineConfig;
pub use context::{ContextPayload, ObservationRecord};
pub use engine::{AreaAnalysis, ExcludedObservation, PointAnalysis, RiskEngine};
pub use geometry::{Coordinates, Polygon};
pub use normalizer::{LevelThresholds, NormalizationTable};
pub use recommendations::{CostTier, Priority, Recommendation, RecommendationRule};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid {category} observation: {reason}")]
    InvalidObservation { category: Category, reason: String },
    #[error("Insufficient data: no usable risk category for {0}")]
    InsufficientData(String),
    #[error("Invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("Invalid polygon: {0}")]
    InvalidPolygon(String),
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Observation categories, in the fixed order used for every iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Temperature,
    AirQuality,
    Vegetation,
    Precipitation,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Temperature,
        Category::AirQuality,
        Category::Vegetation,
        Category::Precipitation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Temperature => "temperature",
            Category::AirQuality => "air_quality",
            Category::Vegetation => "vegetation",
            Category::Precipitation => "precipitation",
        }
    }

    /// Parse a URL path segment or config key ("air-quality" and "air_quality" both accepted)
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "temperature" => Some(Category::Temperature),
            "air_quality" => Some(Category::AirQuality),
            "vegetation" => Some(Category::Vegetation),
            "precipitation" => Some(Category::Precipitation),
            _ => None,
        }
    }

    /// Key of the per-category risk entry in analysis payloads
    pub fn risk_key(&self) -> &'static str {
        match self {
            Category::Temperature => "heat_risk",
            Category::AirQuality => "air_quality_risk",
            Category::Vegetation => "vegetation_risk",
            Category::Precipitation => "flood_risk",
        }
    }

    /// Canonical unit the normalization curves are expressed in
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            Category::Temperature => "°C",
            Category::AirQuality => "µg/m³",
            Category::Vegetation => "NDVI",
            Category::Precipitation => "mm/day",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream data quality flag. Declaration order runs from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    High,
    Medium,
    Low,
    Missing,
}

/// One upstream geophysical measurement for a category at a location and time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub category: Category,
    pub coordinates: Coordinates,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    pub quality: DataQuality,
    pub resolution: String,
    pub latency: String,
    #[serde(default)]
    pub source: String,
}

impl Observation {
    /// High-quality observation in the category's canonical unit
    pub fn new(category: Category, coordinates: Coordinates, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            category,
            coordinates,
            timestamp,
            value,
            unit: category.canonical_unit().to_string(),
            quality: DataQuality::High,
            resolution: "unknown".to_string(),
            latency: "unknown".to_string(),
            source: "unspecified".to_string(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_quality(mut self, quality: DataQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_provenance(
        mut self,
        source: impl Into<String>,
        resolution: impl Into<String>,
        latency: impl Into<String>,
    ) -> Self {
        self.source = source.into();
        self.resolution = resolution.into();
        self.latency = latency.into();
        self
    }
}

/// Discrete severity label derived from a continuous 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Severe,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::Severe => "Severe",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded risk for a single category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub category: Category,
    /// Score in [0, 100]
    pub score: f64,
    pub level: RiskLevel,
    pub source_observation: Observation,
}
