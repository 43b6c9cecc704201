//! TTL cache for upstream observations

use chrono::NaiveDate;
use risk_engine::{Category, Coordinates, Observation};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// (category, coordinates rounded to 2 decimals, date)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: Category,
    pub location: String,
    pub date: NaiveDate,
}

impl CacheKey {
    pub fn new(category: Category, coordinates: Coordinates, date: NaiveDate) -> Self {
        Self {
            category,
            location: coordinates.cache_key(),
            date,
        }
    }
}

struct CacheEntry {
    observation: Observation,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub ttl_sec: u64,
}

#[derive(Clone)]
pub struct ObservationCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl ObservationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached observation, if present and not expired
    pub async fn get(&self, key: &CacheKey) -> Option<Observation> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.observation.clone())
    }

    pub async fn insert(&self, key: CacheKey, observation: Observation) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                observation,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let now = Instant::now();
        CacheStats {
            total: entries.len(),
            valid: entries.values().filter(|e| e.expires_at > now).count(),
            ttl_sec: self.ttl.as_secs(),
        }
    }

    /// Drop every entry, returning how many were removed
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired observation cache entries", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key(category: Category, lat: f64, lng: f64) -> CacheKey {
        let date = NaiveDate::from_ymd_opt(2025, 10, 4).unwrap();
        CacheKey::new(category, Coordinates::new(lat, lng).unwrap(), date)
    }

    fn observation() -> Observation {
        let coords = Coordinates::new(40.7128, -74.0060).unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap();
        Observation::new(Category::Temperature, coords, ts, 21.0)
    }

    #[test]
    fn test_key_rounds_coordinates() {
        assert_eq!(
            key(Category::Temperature, 40.7128, -74.0060),
            key(Category::Temperature, 40.7149, -74.0051)
        );
        assert_ne!(
            key(Category::Temperature, 40.7128, -74.0060),
            key(Category::AirQuality, 40.7128, -74.0060)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ObservationCache::new(Duration::from_secs(60));
        let k = key(Category::Temperature, 40.7128, -74.0060);
        cache.insert(k.clone(), observation()).await;
        assert!(cache.get(&k).await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&k).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.valid, 0);

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = ObservationCache::new(Duration::from_secs(300));
        cache.insert(key(Category::Temperature, 1.0, 1.0), observation()).await;
        cache.insert(key(Category::Temperature, 2.0, 2.0), observation()).await;
        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.stats().await.valid, 0);
    }
}
