//! Point and polygon validation, deterministic area sampling

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Validated WGS84 coordinates, serialized as `[lat, lng]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    lat: f64,
    lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
        let lng_ok = lng.is_finite() && (-180.0..=180.0).contains(&lng);
        if lat_ok && lng_ok {
            Ok(Self { lat, lng })
        } else {
            Err(EngineError::InvalidCoordinates { lat, lng })
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Coordinates rounded to 2 decimal places (~1 km), for cache keys and grouping
    pub fn cache_key(&self) -> String {
        format!("{:.2},{:.2}", self.lat, self.lng)
    }
}

impl TryFrom<[f64; 2]> for Coordinates {
    type Error = EngineError;

    fn try_from([lat, lng]: [f64; 2]) -> Result<Self> {
        Coordinates::new(lat, lng)
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lng]
    }
}

/// Simple polygon ring (no holes)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    vertices: Vec<Coordinates>,
}

impl Polygon {
    /// Build from vertices. A trailing vertex equal to the first closes the
    /// ring and is dropped.
    pub fn new(mut vertices: Vec<Coordinates>) -> Result<Self> {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        let mut distinct: Vec<Coordinates> = Vec::with_capacity(vertices.len());
        for v in &vertices {
            if !distinct.contains(v) {
                distinct.push(*v);
            }
        }
        if distinct.len() < 3 {
            return Err(EngineError::InvalidPolygon(format!(
                "need at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        Ok(Self { vertices })
    }

    /// Build from raw `[lat, lng]` pairs, validating every vertex
    pub fn from_pairs(pairs: &[[f64; 2]]) -> Result<Self> {
        let vertices = pairs
            .iter()
            .map(|&[lat, lng]| {
                Coordinates::new(lat, lng).map_err(|_| {
                    EngineError::InvalidPolygon(format!("vertex out of range: [{}, {}]", lat, lng))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(vertices)
    }

    pub fn vertices(&self) -> &[Coordinates] {
        &self.vertices
    }

    /// Vertex-average centroid
    pub fn centroid(&self) -> Coordinates {
        let n = self.vertices.len() as f64;
        let lat = self.vertices.iter().map(|v| v.lat).sum::<f64>() / n;
        let lng = self.vertices.iter().map(|v| v.lng).sum::<f64>() / n;
        // The mean of in-range values is itself in range
        Coordinates { lat, lng }
    }

    /// Sample points for area analysis: centroid first, then each vertex in input order
    pub fn sample_points(&self) -> Vec<Coordinates> {
        let mut points = Vec::with_capacity(self.vertices.len() + 1);
        points.push(self.centroid());
        points.extend(self.vertices.iter().copied());
        points
    }
}
