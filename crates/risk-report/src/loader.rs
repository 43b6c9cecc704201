//! Observation loading from JSON files

use crate::{ReportError, Result};
use chrono::{DateTime, Utc};
use risk_engine::{Category, Coordinates, DataQuality, Observation};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// Raw observation record from JSON
#[derive(Debug, Deserialize)]
struct RawObservation {
    category: Option<String>,
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "longitude", alias = "lon")]
    lng: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
    value: Option<f64>,
    unit: Option<String>,
    quality: Option<DataQuality>,
    resolution: Option<String>,
    latency: Option<String>,
    source: Option<String>,
}

impl RawObservation {
    fn into_observation(self) -> std::result::Result<Observation, String> {
        let category = self
            .category
            .as_deref()
            .and_then(Category::from_slug)
            .ok_or_else(|| format!("unknown category {:?}", self.category))?;
        let (lat, lng) = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => return Err("missing coordinates".to_string()),
        };
        let coordinates = Coordinates::new(lat, lng).map_err(|e| e.to_string())?;
        let timestamp = self.timestamp.ok_or("missing timestamp")?;
        let value = self.value.ok_or("missing value")?;

        let mut obs = Observation::new(category, coordinates, timestamp, value)
            .with_quality(self.quality.unwrap_or(DataQuality::High));
        if let Some(unit) = self.unit {
            obs = obs.with_unit(unit);
        }
        if let Some(resolution) = self.resolution {
            obs.resolution = resolution;
        }
        if let Some(latency) = self.latency {
            obs.latency = latency;
        }
        if let Some(source) = self.source {
            obs.source = source;
        }
        Ok(obs)
    }
}

/// Observations grouped per location, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct LoadedObservations {
    pub locations: Vec<(Coordinates, Vec<Observation>)>,
    pub skipped: usize,
}

impl LoadedObservations {
    pub fn observation_count(&self) -> usize {
        self.locations.iter().map(|(_, obs)| obs.len()).sum()
    }
}

/// Load and group observation records. Malformed records are skipped and counted.
pub fn load_observations(path: impl AsRef<Path>) -> Result<LoadedObservations> {
    let path = path.as_ref();
    info!("Loading observations from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let records: Vec<RawObservation> = serde_json::from_reader(reader)?;

    let mut loaded = LoadedObservations::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (i, record) in records.into_iter().enumerate() {
        let obs = match record.into_observation() {
            Ok(obs) => obs,
            Err(reason) => {
                debug!("Skipping record {}: {}", i, reason);
                loaded.skipped += 1;
                continue;
            }
        };

        // Exact coordinates identify a location; the rounded cache key would merge neighbours
        let key = format!("{},{}", obs.coordinates.lat(), obs.coordinates.lng());
        let slot = *index.entry(key).or_insert_with(|| {
            loaded.locations.push((obs.coordinates, Vec::new()));
            loaded.locations.len() - 1
        });
        loaded.locations[slot].1.push(obs);
    }

    info!(
        "Loaded {} observations at {} locations ({} records skipped)",
        loaded.observation_count(),
        loaded.locations.len(),
        loaded.skipped
    );

    if loaded.locations.is_empty() {
        return Err(ReportError::NoObservations);
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_groups_by_location() {
        let file = write(
            r#"[
            {"category": "temperature", "lat": 40.7128, "lng": -74.006, "timestamp": "2025-10-04T12:00:00Z", "value": 31.5},
            {"category": "air-quality", "latitude": 34.05, "longitude": -118.24, "timestamp": "2025-10-04T12:00:00Z", "value": 40.0, "unit": "ppb"},
            {"category": "vegetation", "lat": 40.7128, "lng": -74.006, "timestamp": "2025-10-04T12:00:00Z", "value": 0.21, "quality": "medium"}
        ]"#,
        );

        let loaded = load_observations(file.path()).unwrap();
        assert_eq!(loaded.locations.len(), 2);
        assert_eq!(loaded.skipped, 0);

        let (nyc, obs) = &loaded.locations[0];
        assert_eq!(nyc.lat(), 40.7128);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].quality, DataQuality::Medium);
        assert_eq!(loaded.locations[1].1[0].unit, "ppb");
    }

    #[test]
    fn test_skips_malformed_records() {
        let file = write(
            r#"[
            {"category": "temperature", "lat": 95.0, "lng": 0.0, "timestamp": "2025-10-04T12:00:00Z", "value": 20.0},
            {"category": "soil", "lat": 10.0, "lng": 10.0, "timestamp": "2025-10-04T12:00:00Z", "value": 1.0},
            {"category": "temperature", "lat": 10.0, "lng": 10.0, "value": 20.0},
            {"category": "temperature", "lat": 10.0, "lng": 10.0, "timestamp": "2025-10-04T12:00:00Z", "value": 20.0}
        ]"#,
        );

        let loaded = load_observations(file.path()).unwrap();
        assert_eq!(loaded.skipped, 3);
        assert_eq!(loaded.observation_count(), 1);
    }

    #[test]
    fn test_empty_input_is_error() {
        let file = write("[]");
        assert!(matches!(load_observations(file.path()), Err(ReportError::NoObservations)));
    }
}
