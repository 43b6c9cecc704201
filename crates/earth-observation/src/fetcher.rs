//! Concurrent, cached, timeout-bounded observation fetching

use crate::cache::{CacheKey, CacheStats, ObservationCache};
use crate::{FetchError, ObservationSource, Result, SourceInfo};
use chrono::NaiveDate;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use risk_engine::{Category, Coordinates, Observation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Cache TTL in seconds (default: 900 = 15 minutes)
    pub cache_ttl_sec: u64,
    /// Per-category timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum sample points fetched concurrently for area queries
    pub max_concurrent_points: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_sec: 900,
            timeout_ms: 8000,
            max_concurrent_points: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub category: Category,
    pub reason: String,
}

/// Joined result of a category fan-out. Failed categories are listed, never fatal.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub observations: Vec<Observation>,
    pub failures: Vec<FetchFailure>,
}

impl FetchOutcome {
    pub fn failed_categories(&self) -> Vec<Category> {
        self.failures.iter().map(|f| f.category).collect()
    }
}

pub struct ObservationFetcher {
    source: Arc<dyn ObservationSource>,
    cache: ObservationCache,
    config: FetchConfig,
}

impl ObservationFetcher {
    pub fn new(source: Arc<dyn ObservationSource>, config: FetchConfig) -> Self {
        Self {
            source,
            cache: ObservationCache::new(Duration::from_secs(config.cache_ttl_sec)),
            config,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn describe(&self) -> Vec<SourceInfo> {
        self.source.describe()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.clear().await
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.purge_expired().await
    }

    /// One category: cache first, then the source under the per-category timeout
    pub async fn fetch(&self, category: Category, coordinates: Coordinates, date: NaiveDate) -> Result<Observation> {
        let key = CacheKey::new(category, coordinates, date);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Cache hit for {} at {} on {}", category, key.location, date);
            // Entries are shared across a ~1 km cell; report the requested point
            return Ok(Observation { coordinates, ..cached });
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let observation = tokio::time::timeout(timeout, self.source.fetch(category, coordinates, date))
            .await
            .map_err(|_| FetchError::Timeout {
                category,
                timeout_ms: self.config.timeout_ms,
            })??;

        self.cache.insert(key, observation.clone()).await;
        Ok(observation)
    }

    /// Fetch every requested category concurrently and join the results
    pub async fn fetch_all(&self, coordinates: Coordinates, categories: &[Category], date: NaiveDate) -> FetchOutcome {
        let futures: Vec<_> = categories
            .iter()
            .map(|&category| async move { (category, self.fetch(category, coordinates, date).await) })
            .collect();

        let mut outcome = FetchOutcome::default();
        for (category, result) in join_all(futures).await {
            match result {
                Ok(obs) => outcome.observations.push(obs),
                Err(e) => {
                    warn!(
                        "{} fetch failed for {} at {}: {}",
                        self.source.name(),
                        category,
                        coordinates.cache_key(),
                        e
                    );
                    outcome.failures.push(FetchFailure {
                        category,
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Fan out over area sample points, preserving point order
    pub async fn fetch_points(
        &self,
        points: &[Coordinates],
        categories: &[Category],
        date: NaiveDate,
    ) -> Vec<(Coordinates, FetchOutcome)> {
        stream::iter(points.iter().copied())
            .map(|point| async move { (point, self.fetch_all(point, categories, date).await) })
            .buffered(self.config.max_concurrent_points.max(1))
            .collect()
            .await
    }
}
