//! Open-Meteo provider (free, no API key)
//!
//! Temperature and precipitation come from the forecast API's daily series,
//! NO₂ from the air-quality API's hourly series averaged over the day.
//! Vegetation index is not available from Open-Meteo.

use crate::{FetchError, ObservationSource, Result, SourceInfo};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use risk_engine::{Category, Coordinates, DataQuality, Observation};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";
const PROVIDER: &str = "Open-Meteo";

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: DailySeries,
}

#[derive(Debug, Deserialize)]
struct DailySeries {
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: HourlySeries,
}

#[derive(Debug, Deserialize)]
struct HourlySeries {
    #[serde(default)]
    nitrogen_dioxide: Vec<Option<f64>>,
}

pub struct OpenMeteoSource {
    client: reqwest::Client,
    forecast_url: String,
    air_quality_url: String,
}

impl OpenMeteoSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            forecast_url: FORECAST_URL.to_string(),
            air_quality_url: AIR_QUALITY_URL.to_string(),
        })
    }

    /// Point the client at a different host (self-hosted Open-Meteo)
    pub fn with_base_urls(mut self, forecast_url: impl Into<String>, air_quality_url: impl Into<String>) -> Self {
        self.forecast_url = forecast_url.into();
        self.air_quality_url = air_quality_url.into();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Api {
                provider: PROVIDER.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    fn query(coordinates: Coordinates, date: NaiveDate) -> Vec<(&'static str, String)> {
        let day = date.format("%Y-%m-%d").to_string();
        vec![
            ("latitude", format!("{:.6}", coordinates.lat())),
            ("longitude", format!("{:.6}", coordinates.lng())),
            ("start_date", day.clone()),
            ("end_date", day),
            ("timezone", "UTC".to_string()),
        ]
    }
}

/// First non-null value of a daily series
fn daily_value(series: &[Option<f64>], variable: &str) -> Result<f64> {
    series
        .iter()
        .flatten()
        .copied()
        .next()
        .ok_or_else(|| FetchError::Parse(format!("no {} value for the requested day", variable)))
}

/// Mean of the non-null hourly values, with quality downgraded for gaps
fn hourly_mean(series: &[Option<f64>], variable: &str) -> Result<(f64, DataQuality)> {
    let present: Vec<f64> = series.iter().flatten().copied().collect();
    if present.is_empty() {
        return Err(FetchError::Parse(format!("no {} values for the requested day", variable)));
    }

    let mean = present.iter().sum::<f64>() / present.len() as f64;
    let coverage = present.len() as f64 / series.len() as f64;
    let quality = if coverage >= 0.9 {
        DataQuality::High
    } else if coverage >= 0.5 {
        DataQuality::Medium
    } else {
        DataQuality::Low
    };
    Ok((mean, quality))
}

fn observation_at(category: Category, coordinates: Coordinates, date: NaiveDate, value: f64) -> Result<Observation> {
    let noon = date
        .and_hms_opt(12, 0, 0)
        .ok_or_else(|| FetchError::Parse(format!("invalid date {}", date)))?;
    Ok(Observation::new(category, coordinates, Utc.from_utc_datetime(&noon), value))
}

#[async_trait]
impl ObservationSource for OpenMeteoSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(&self, category: Category, coordinates: Coordinates, date: NaiveDate) -> Result<Observation> {
        let mut query = Self::query(coordinates, date);
        debug!("Fetching {} from Open-Meteo for {} on {}", category, coordinates.cache_key(), date);

        match category {
            Category::Temperature => {
                query.push(("daily", "temperature_2m_max".to_string()));
                let data: DailyResponse = self.get_json(&self.forecast_url, &query).await?;
                let value = daily_value(&data.daily.temperature_2m_max, "temperature_2m_max")?;
                Ok(observation_at(category, coordinates, date, value)?.with_provenance(
                    "Open-Meteo Forecast (2 m air temperature, daily max)",
                    "~11km",
                    "1-3 hours",
                ))
            }
            Category::Precipitation => {
                query.push(("daily", "precipitation_sum".to_string()));
                let data: DailyResponse = self.get_json(&self.forecast_url, &query).await?;
                let value = daily_value(&data.daily.precipitation_sum, "precipitation_sum")?;
                Ok(observation_at(category, coordinates, date, value)?.with_provenance(
                    "Open-Meteo Forecast (daily precipitation sum)",
                    "~11km",
                    "1-3 hours",
                ))
            }
            Category::AirQuality => {
                query.push(("hourly", "nitrogen_dioxide".to_string()));
                let data: HourlyResponse = self.get_json(&self.air_quality_url, &query).await?;
                let (value, quality) = hourly_mean(&data.hourly.nitrogen_dioxide, "nitrogen_dioxide")?;
                Ok(observation_at(category, coordinates, date, value)?
                    .with_quality(quality)
                    .with_provenance("Open-Meteo Air Quality (CAMS NO₂, daily mean)", "~11km", "1-3 hours"))
            }
            Category::Vegetation => Err(FetchError::Unsupported {
                source_name: PROVIDER.to_string(),
                category,
            }),
        }
    }

    fn describe(&self) -> Vec<SourceInfo> {
        let info = |category, name: &str, url: &str| SourceInfo {
            category,
            name: name.to_string(),
            provider: PROVIDER.to_string(),
            resolution: "~11km".to_string(),
            latency: "1-3 hours".to_string(),
            url: url.to_string(),
        };
        vec![
            info(Category::Temperature, "2 m air temperature (daily max)", &self.forecast_url),
            info(Category::AirQuality, "NO₂ surface concentration (CAMS)", &self.air_quality_url),
            info(Category::Precipitation, "Daily precipitation sum", &self.forecast_url),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daily_response() {
        let body = r#"{
            "latitude": 40.71, "longitude": -74.01,
            "daily": { "time": ["2025-10-04"], "temperature_2m_max": [24.3], "precipitation_sum": [null] }
        }"#;
        let data: DailyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(daily_value(&data.daily.temperature_2m_max, "t").unwrap(), 24.3);
        assert!(matches!(
            daily_value(&data.daily.precipitation_sum, "p"),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_hourly_mean_quality() {
        let full: Vec<Option<f64>> = (0..24).map(|h| Some(h as f64)).collect();
        let (mean, quality) = hourly_mean(&full, "no2").unwrap();
        assert!((mean - 11.5).abs() < 1e-9);
        assert_eq!(quality, DataQuality::High);

        let mut gappy = full.clone();
        for v in gappy.iter_mut().take(8) {
            *v = None;
        }
        assert_eq!(hourly_mean(&gappy, "no2").unwrap().1, DataQuality::Medium);

        let empty = vec![None; 24];
        assert!(hourly_mean(&empty, "no2").is_err());
    }

    #[tokio::test]
    async fn test_vegetation_unsupported() {
        let source = OpenMeteoSource::new(Duration::from_secs(5)).unwrap();
        let coords = Coordinates::new(40.7128, -74.0060).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 10, 4).unwrap();
        let err = source.fetch(Category::Vegetation, coords, date).await.unwrap_err();
        assert!(matches!(err, FetchError::Unsupported { .. }));
        assert_eq!(source.describe().len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires network access to api.open-meteo.com"]
    async fn test_live_temperature_fetch() {
        let source = OpenMeteoSource::new(Duration::from_secs(10)).unwrap();
        let coords = Coordinates::new(40.7128, -74.0060).unwrap();
        let today = Utc::now().date_naive();

        let obs = source.fetch(Category::Temperature, coords, today).await.unwrap();
        assert!(obs.value > -60.0 && obs.value < 60.0);
        assert_eq!(obs.unit, "°C");
    }
}
