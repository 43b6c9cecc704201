//! Earth Observation Fetch Layer
//!
//! Pulls per-category geophysical observations from upstream providers and
//! hands them to the risk engine already parsed.
//!
//! - [`ObservationSource`] abstracts a provider (Open-Meteo, static fixtures)
//! - [`ObservationCache`] keeps responses keyed by (category, rounded
//!   coordinates, date) with an explicit TTL
//! - [`ObservationFetcher`] fans the categories out concurrently with a
//!   per-category timeout and joins them into a [`FetchOutcome`]
//!
//! # Usage
//!
//! ```rust,ignore
//! let fetcher = ObservationFetcher::new(Arc::new(OpenMeteoSource::new()?), FetchConfig::default());
//! let outcome = fetcher.fetch_all(coords, &Category::ALL, today).await;
//! let analysis = engine.assess_point(coords, outcome.observations, &Category::ALL)?;
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use risk_engine::{Category, Coordinates, Observation};
use serde::Serialize;
use thiserror::Error;

pub mod cache;
pub mod fetcher;
pub mod fixtures;
pub mod open_meteo;

pub use cache::{CacheStats, ObservationCache};
pub use fetcher::{FetchConfig, FetchFailure, FetchOutcome, ObservationFetcher};
pub use fixtures::StaticSource;
pub use open_meteo::OpenMeteoSource;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("{provider} returned status {status}")]
    Api { provider: String, status: u16 },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Timed out fetching {category} after {timeout_ms}ms")]
    Timeout { category: Category, timeout_ms: u64 },
    #[error("{source_name} does not provide {category} data")]
    Unsupported { source_name: String, category: Category },
    #[error("Fixture error: {0}")]
    Fixture(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Provider metadata for one category, as listed by `/api/data-sources`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub category: Category,
    pub name: String,
    pub provider: String,
    pub resolution: String,
    pub latency: String,
    pub url: String,
}

/// An upstream provider of observations
#[async_trait]
pub trait ObservationSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, category: Category, coordinates: Coordinates, date: NaiveDate) -> Result<Observation>;

    fn describe(&self) -> Vec<SourceInfo>;
}
