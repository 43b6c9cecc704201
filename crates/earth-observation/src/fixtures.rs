//! Static observation source for offline development and tests.
//!
//! Fixture file format:
//!
//! ```json
//! {
//!   "defaults": {
//!     "temperature": { "value": 31.5 },
//!     "air_quality": { "value": 18.0, "unit": "ppb", "quality": "medium" }
//!   },
//!   "locations": [
//!     { "coordinates": [40.71, -74.01], "readings": { "vegetation": { "value": 0.12 } } }
//!   ]
//! }
//! ```
//!
//! Location readings match on rounded coordinates and take precedence over
//! the defaults.

use crate::{FetchError, ObservationSource, Result, SourceInfo};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use risk_engine::{Category, Coordinates, DataQuality, Observation};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

const SOURCE_NAME: &str = "static";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixtureReading {
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_quality")]
    pub quality: DataQuality,
}

fn default_quality() -> DataQuality {
    DataQuality::High
}

impl FixtureReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            unit: None,
            quality: DataQuality::High,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocationFixture {
    coordinates: Coordinates,
    readings: BTreeMap<Category, FixtureReading>,
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    defaults: BTreeMap<Category, FixtureReading>,
    #[serde(default)]
    locations: Vec<LocationFixture>,
}

/// Serves fixed readings per category, optionally per location
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    defaults: BTreeMap<Category, FixtureReading>,
    locations: HashMap<String, BTreeMap<Category, FixtureReading>>,
}

impl StaticSource {
    /// Built-in readings describing a warm, moderately polluted city block
    pub fn sample() -> Self {
        Self::default()
            .with_default(Category::Temperature, FixtureReading::new(31.5))
            .with_default(Category::AirQuality, FixtureReading::new(58.0))
            .with_default(Category::Vegetation, FixtureReading::new(0.32))
            .with_default(Category::Precipitation, FixtureReading::new(2.4))
    }

    pub fn with_default(mut self, category: Category, reading: FixtureReading) -> Self {
        self.defaults.insert(category, reading);
        self
    }

    pub fn with_location(mut self, coordinates: Coordinates, category: Category, reading: FixtureReading) -> Self {
        self.locations
            .entry(coordinates.cache_key())
            .or_default()
            .insert(category, reading);
        self
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Fixture(format!("{}: {}", path.display(), e)))?;
        let source = Self::from_json_str(&text)?;
        info!(
            "Loaded observation fixtures from {:?}: {} default categories, {} locations",
            path,
            source.defaults.len(),
            source.locations.len()
        );
        Ok(source)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: FixtureFile = serde_json::from_str(text).map_err(|e| FetchError::Fixture(e.to_string()))?;
        let mut source = Self {
            defaults: file.defaults,
            locations: HashMap::new(),
        };
        for location in file.locations {
            source
                .locations
                .entry(location.coordinates.cache_key())
                .or_default()
                .extend(location.readings);
        }
        Ok(source)
    }

    fn reading(&self, category: Category, coordinates: Coordinates) -> Option<&FixtureReading> {
        self.locations
            .get(&coordinates.cache_key())
            .and_then(|r| r.get(&category))
            .or_else(|| self.defaults.get(&category))
    }
}

#[async_trait]
impl ObservationSource for StaticSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, category: Category, coordinates: Coordinates, date: NaiveDate) -> Result<Observation> {
        let reading = self.reading(category, coordinates).ok_or_else(|| FetchError::Unsupported {
            source_name: SOURCE_NAME.to_string(),
            category,
        })?;
        let noon = date
            .and_hms_opt(12, 0, 0)
            .ok_or_else(|| FetchError::Fixture(format!("invalid date {}", date)))?;

        let mut observation = Observation::new(category, coordinates, Utc.from_utc_datetime(&noon), reading.value)
            .with_quality(reading.quality)
            .with_provenance("Static fixture", "fixture", "none");
        if let Some(unit) = &reading.unit {
            observation = observation.with_unit(unit.clone());
        }
        Ok(observation)
    }

    fn describe(&self) -> Vec<SourceInfo> {
        let mut categories: Vec<Category> = self.defaults.keys().copied().collect();
        for readings in self.locations.values() {
            categories.extend(readings.keys().copied());
        }
        categories.sort();
        categories.dedup();

        categories
            .into_iter()
            .map(|category| SourceInfo {
                category,
                name: format!("Static {} fixture", category),
                provider: SOURCE_NAME.to_string(),
                resolution: "fixture".to_string(),
                latency: "none".to_string(),
                url: String::new(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 4).unwrap()
    }

    #[tokio::test]
    async fn test_sample_covers_all_categories() {
        let source = StaticSource::sample();
        let coords = Coordinates::new(40.7128, -74.0060).unwrap();
        for category in Category::ALL {
            let obs = source.fetch(category, coords, date()).await.unwrap();
            assert_eq!(obs.category, category);
            assert_eq!(obs.unit, category.canonical_unit());
            assert_eq!(obs.timestamp.date_naive(), date());
        }
        assert_eq!(source.describe().len(), 4);
    }

    #[tokio::test]
    async fn test_location_overrides_default() {
        let hot = Coordinates::new(34.05, -118.24).unwrap();
        let source = StaticSource::sample().with_location(hot, Category::Temperature, FixtureReading::new(41.0));

        let there = source.fetch(Category::Temperature, hot, date()).await.unwrap();
        let elsewhere = source
            .fetch(Category::Temperature, Coordinates::new(0.0, 0.0).unwrap(), date())
            .await
            .unwrap();
        assert_eq!(there.value, 41.0);
        assert_eq!(elsewhere.value, 31.5);
    }

    #[tokio::test]
    async fn test_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "defaults": {{ "air_quality": {{ "value": 18.0, "unit": "ppb", "quality": "medium" }} }},
                "locations": [ {{ "coordinates": [40.71, -74.01], "readings": {{ "vegetation": {{ "value": 0.12 }} }} }} ]
            }}"#
        )
        .unwrap();

        let source = StaticSource::from_json_file(file.path()).unwrap();
        let coords = Coordinates::new(40.7128, -74.0060).unwrap();

        let air = source.fetch(Category::AirQuality, coords, date()).await.unwrap();
        assert_eq!(air.unit, "ppb");
        assert_eq!(air.quality, DataQuality::Medium);

        let veg = source.fetch(Category::Vegetation, coords, date()).await.unwrap();
        assert_eq!(veg.value, 0.12);

        let err = source.fetch(Category::Temperature, coords, date()).await.unwrap_err();
        assert!(matches!(err, FetchError::Unsupported { .. }));
    }

    #[test]
    fn test_malformed_fixture() {
        assert!(matches!(
            StaticSource::from_json_str("{ not json"),
            Err(FetchError::Fixture(_))
        ));
    }
}
