//! Batch Risk Reports
//!
//! Loads observation records from a JSON file, runs them through the risk
//! engine per location (or as the sample points of one area) and writes the
//! resulting context payloads, plus an optional GeoJSON map layer.
//!
//! Input records:
//!
//! ```json
//! [
//!   { "category": "temperature", "lat": 40.7128, "lng": -74.0060,
//!     "timestamp": "2025-10-04T12:00:00Z", "value": 31.5, "unit": "°C",
//!     "quality": "high", "source": "MODIS LST" }
//! ]
//! ```

use thiserror::Error;

pub mod loader;
pub mod report;

pub use loader::{load_observations, LoadedObservations};
pub use report::{build_area_report, build_point_report, to_geojson, LocationSummary, RiskReport};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] risk_engine::EngineError),
    #[error("No usable observations in input")]
    NoObservations,
}

pub type Result<T> = std::result::Result<T, ReportError>;
