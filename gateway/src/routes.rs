//! HTTP routes for point and area risk analysis
//!
//! | Route                           | Purpose                                   |
//! |---------------------------------|-------------------------------------------|
//! | `GET /api/nasa/:category`       | one observation with its risk label       |
//! | `POST /api/analyze`             | full point analysis (+ optional question) |
//! | `POST /api/heat-islands`        | area heat risk over a polygon             |
//! | `POST /api/air-quality-analysis`| area air quality risk over a polygon      |
//! | `POST /api/chat`                | grounded conversational answer            |

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use earth_observation::{FetchFailure, FetchOutcome};
use risk_engine::context::round_one_decimal;
use risk_engine::{
    Category, ContextPayload, Coordinates, ExcludedObservation, Observation, ObservationRecord, Polygon, RiskLevel,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatReply;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/data-sources", get(data_sources))
        .route("/api/nasa/:category", get(nasa_observation))
        .route("/api/analyze", post(analyze))
        .route("/api/heat-islands", post(heat_islands))
        .route("/api/air-quality-analysis", post(air_quality_analysis))
        .route("/api/chat", post(chat))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/clear", post(clear_cache))
        .with_state(state)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn coordinates([lat, lng]: [f64; 2]) -> Result<Coordinates, ApiError> {
    Ok(Coordinates::new(lat, lng)?)
}

/// Categories covered by an analysis type
fn requested_categories(analysis_type: &str) -> Result<Vec<Category>, ApiError> {
    let normalized = analysis_type.trim().to_ascii_lowercase().replace('-', "_");
    match normalized.as_str() {
        "comprehensive" | "all" => Ok(Category::ALL.to_vec()),
        "heat" | "heat_island" => Ok(vec![Category::Temperature, Category::Vegetation]),
        "flood" => Ok(vec![Category::Precipitation]),
        other => Category::from_slug(other)
            .map(|c| vec![c])
            .ok_or_else(|| ApiError::bad_request(format!("unknown analysis_type '{}'", analysis_type))),
    }
}

/// 502 when nothing at all could be fetched
fn ensure_any_data(observations: usize, failures: &[FetchFailure]) -> Result<(), ApiError> {
    if observations == 0 && !failures.is_empty() {
        let details = failures.iter().map(|f| format!("{}: {}", f.category, f.reason)).collect();
        return Err(ApiError::upstream("all upstream data sources unavailable", details));
    }
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "urban-risk-gateway",
        "description": "Climate-resilient urban risk analysis",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET /api/data-sources",
            "GET /api/nasa/{temperature|air-quality|vegetation|precipitation}?lat=&lng=",
            "POST /api/analyze",
            "POST /api/heat-islands",
            "POST /api/air-quality-analysis",
            "POST /api/chat",
            "GET /api/cache/stats",
            "POST /api/cache/clear"
        ]
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "urban-risk-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.fetcher.source_name(),
        "ai_enabled": state.chat.is_configured(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn data_sources(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.fetcher.cache_stats().await;
    Json(serde_json::json!({
        "provider": state.fetcher.source_name(),
        "sources": state.fetcher.describe(),
        "cache_ttl_sec": stats.ttl_sec,
    }))
}

#[derive(Deserialize)]
pub struct ObservationQuery {
    pub lat: f64,
    pub lng: f64,
    pub date: Option<NaiveDate>,
}

/// Single-category observation with its derived risk label
pub async fn nasa_observation(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<ObservationQuery>,
) -> ApiResult<ObservationRecord> {
    let category = Category::from_slug(&category)
        .ok_or_else(|| ApiError::bad_request(format!("unknown category '{}'", category)))?;
    let coords = coordinates([query.lat, query.lng])?;

    let observation = state
        .fetcher
        .fetch(category, coords, query.date.unwrap_or_else(today))
        .await?;

    let risk = match state.engine.normalize(&observation) {
        Ok(assessment) => Some(assessment.level),
        Err(e) => {
            tracing::warn!("Observation not scored: {}", e);
            None
        }
    };

    Ok(Json(ObservationRecord::new(&observation, risk)))
}

fn default_analysis_type() -> String {
    "comprehensive".to_string()
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub coordinates: [f64; 2],
    #[serde(default = "default_analysis_type")]
    pub analysis_type: String,
    pub query: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub analysis_id: Uuid,
    pub analysis_type: String,
    pub coordinates: Coordinates,
    #[serde(flatten)]
    pub payload: ContextPayload,
    pub excluded: Vec<ExcludedObservation>,
    pub fetch_failures: Vec<FetchFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<ChatReply>,
}

/// Point analysis: fetch, score, recommend and optionally answer a question
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<AnalyzeResponse> {
    let coords = coordinates(request.coordinates)?;
    let requested = requested_categories(&request.analysis_type)?;

    let FetchOutcome { observations, failures } = state
        .fetcher
        .fetch_all(coords, &requested, request.date.unwrap_or_else(today))
        .await;
    ensure_any_data(observations.len(), &failures)?;

    let analysis = state.engine.assess_point(coords, observations, &requested)?;
    let payload = state.engine.payload_for_point(&analysis);

    let ai_response = match request.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => Some(state.chat.answer(q, Some(&payload)).await),
        _ => None,
    };

    tracing::info!(
        "Analyzed {} ({}): overall={:.1} {}",
        coords.cache_key(),
        request.analysis_type,
        payload.ml_analysis.overall_risk_score,
        payload.ml_analysis.overall_level
    );

    Ok(Json(AnalyzeResponse {
        analysis_id: Uuid::new_v4(),
        analysis_type: request.analysis_type,
        coordinates: coords,
        payload,
        excluded: analysis.excluded,
        fetch_failures: failures,
        ai_response,
    }))
}

#[derive(Deserialize)]
pub struct AreaRequest {
    /// Polygon ring as `[lat, lng]` pairs
    pub coordinates: Vec<[f64; 2]>,
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct SamplePoint {
    pub coordinates: Coordinates,
    pub overall_risk_score: f64,
    pub overall_level: RiskLevel,
}

#[derive(Serialize)]
pub struct PointFailure {
    pub coordinates: Coordinates,
    #[serde(flatten)]
    pub failure: FetchFailure,
}

#[derive(Serialize)]
pub struct AreaResponse {
    pub analysis_id: Uuid,
    pub area_id: String,
    pub category: Category,
    pub polygon: Vec<Coordinates>,
    pub sample_points: Vec<SamplePoint>,
    pub skipped_points: Vec<Coordinates>,
    #[serde(flatten)]
    pub payload: ContextPayload,
    pub fetch_failures: Vec<PointFailure>,
}

async fn area_analysis(
    state: &AppState,
    request: AreaRequest,
    category: Category,
    prefix: &str,
) -> Result<AreaResponse, ApiError> {
    let polygon = Polygon::from_pairs(&request.coordinates)?;
    let area_id = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{}-{}", prefix, polygon.centroid().cache_key()));
    let requested = [category];

    let fetched = state
        .fetcher
        .fetch_points(&polygon.sample_points(), &requested, request.date.unwrap_or_else(today))
        .await;

    let mut samples: Vec<(Coordinates, Vec<Observation>)> = Vec::with_capacity(fetched.len());
    let mut fetch_failures = Vec::new();
    for (point, outcome) in fetched {
        fetch_failures.extend(outcome.failures.into_iter().map(|failure| PointFailure {
            coordinates: point,
            failure,
        }));
        samples.push((point, outcome.observations));
    }
    let fetched_count = samples.iter().map(|(_, obs)| obs.len()).sum();
    let failures: Vec<FetchFailure> = fetch_failures.iter().map(|f| f.failure.clone()).collect();
    ensure_any_data(fetched_count, &failures)?;

    let area = state.engine.assess_area(&area_id, &polygon, samples, &requested)?;
    let payload = state.engine.payload_for_area(&area);

    let sample_points = area
        .points
        .iter()
        .map(|p| {
            let coordinates = match p.composite.target() {
                risk_engine::AssessmentTarget::Point { coordinates } => *coordinates,
                risk_engine::AssessmentTarget::Area { centroid, .. } => *centroid,
            };
            SamplePoint {
                coordinates,
                overall_risk_score: round_one_decimal(p.composite.overall_score()),
                overall_level: p.composite.overall_level(),
            }
        })
        .collect();

    Ok(AreaResponse {
        analysis_id: Uuid::new_v4(),
        area_id,
        category,
        polygon: polygon.vertices().to_vec(),
        sample_points,
        skipped_points: area.skipped_points,
        payload,
        fetch_failures,
    })
}

pub async fn heat_islands(
    State(state): State<AppState>,
    Json(request): Json<AreaRequest>,
) -> ApiResult<AreaResponse> {
    Ok(Json(area_analysis(&state, request, Category::Temperature, "heat-island").await?))
}

pub async fn air_quality_analysis(
    State(state): State<AppState>,
    Json(request): Json<AreaRequest>,
) -> ApiResult<AreaResponse> {
    Ok(Json(area_analysis(&state, request, Category::AirQuality, "air-quality").await?))
}

#[derive(Deserialize)]
pub struct ChatContext {
    pub coordinates: [f64; 2],
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub context: Option<ChatContext>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub reply: ChatReply,
    pub timestamp: String,
}

/// Grounded chat. Failing to build the grounding payload degrades to an
/// ungrounded answer rather than an error.
pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> ApiResult<ChatResponse> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let payload = match request.context {
        Some(ctx) => {
            let coords = coordinates(ctx.coordinates)?;
            let outcome = state
                .fetcher
                .fetch_all(coords, &Category::ALL, ctx.date.unwrap_or_else(today))
                .await;
            match state.engine.assess_point(coords, outcome.observations, &Category::ALL) {
                Ok(analysis) => Some(state.engine.payload_for_point(&analysis)),
                Err(e) => {
                    tracing::warn!("Answering without grounding: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let reply = state.chat.answer(message, payload.as_ref()).await;
    Ok(Json(ChatResponse {
        reply,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<earth_observation::CacheStats> {
    Json(state.fetcher.cache_stats().await)
}

async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.fetcher.clear_cache().await;
    tracing::info!("Cleared {} observation cache entries", cleared);
    Json(serde_json::json!({ "cleared": cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatService;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use earth_observation::fixtures::FixtureReading;
    use earth_observation::{FetchConfig, ObservationFetcher, StaticSource};
    use risk_engine::RiskEngine;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(source: StaticSource) -> Router {
        let state = AppState {
            engine: Arc::new(RiskEngine::default()),
            fetcher: Arc::new(ObservationFetcher::new(Arc::new(source), FetchConfig::default())),
            chat: Arc::new(ChatService::new(None, "test-model", Duration::from_secs(1)).unwrap()),
        };
        api_router(state)
    }

    fn app() -> Router {
        app_with(StaticSource::sample())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read(resp).await
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read(resp).await
    }

    async fn read(resp: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn square() -> serde_json::Value {
        serde_json::json!([[40.70, -74.02], [40.70, -74.00], [40.72, -74.00], [40.72, -74.02]])
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["provider"], "static");
        assert_eq!(body["ai_enabled"], false);
    }

    #[tokio::test]
    async fn test_data_sources() {
        let (status, body) = get_json(app(), "/api/data-sources").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sources"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_nasa_temperature() {
        let (status, body) = get_json(app(), "/api/nasa/temperature?lat=40.7128&lng=-74.0060&date=2025-10-04").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature_celsius"], 31.5);
        assert_eq!(body["heat_risk"], "High");
        assert_eq!(body["date"], "2025-10-04");
        assert_eq!(body["data_quality"], "high");
        assert!(body["temperature_fahrenheit"].as_f64().unwrap() > 88.0);
    }

    #[tokio::test]
    async fn test_nasa_air_quality_slug() {
        let (status, body) = get_json(app(), "/api/nasa/air-quality?lat=40.7128&lng=-74.0060").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["no2_concentration"], 58.0);
        assert_eq!(body["health_risk"], "Moderate");
    }

    #[tokio::test]
    async fn test_nasa_rejects_bad_input() {
        let (status, _) = get_json(app(), "/api/nasa/soil?lat=40.0&lng=-74.0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(app(), "/api/nasa/temperature?lat=95.0&lng=0.0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid coordinates"));
    }

    #[tokio::test]
    async fn test_nasa_upstream_failure_is_502() {
        let source = StaticSource::default().with_default(Category::Temperature, FixtureReading::new(20.0));
        let (status, _) = get_json(app_with(source), "/api/nasa/vegetation?lat=40.0&lng=-74.0").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_analyze_comprehensive() {
        let (status, body) = post_json(
            app(),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["analysis_id"].is_string());
        assert_eq!(body["analysis_type"], "comprehensive");
        assert_eq!(body["nasa_data"].as_array().unwrap().len(), 4);
        assert_eq!(body["ml_analysis"]["heat_risk"]["level"], "High");
        // (62.5 + 32.5 + 60 + 6.5) / 4
        assert_eq!(body["ml_analysis"]["overall_risk_score"], 40.4);
        assert_eq!(body["ml_analysis"]["overall_level"], "Moderate");
        assert_eq!(body["recommendations"][0]["priority"], "High");
        assert_eq!(body["recommendations"][0]["category"], "Heat Island Mitigation");
        assert!(body.get("ai_response").is_none());
    }

    #[tokio::test]
    async fn test_analyze_with_query_uses_fallback() {
        let (status, body) = post_json(
            app(),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060], "query": "How bad is the heat?" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ai_response"]["source"], "fallback");
        assert!(body["ai_response"]["response"].as_str().unwrap().contains("temperature risk is High"));
    }

    #[tokio::test]
    async fn test_analyze_partial_upstream() {
        let source = StaticSource::default().with_default(Category::Temperature, FixtureReading::new(7.51));
        let (status, body) = post_json(
            app_with(source),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nasa_data"][0]["heat_risk"], "Low");
        assert_eq!(body["missing_categories"].as_array().unwrap().len(), 3);
        assert_eq!(body["fetch_failures"].as_array().unwrap().len(), 3);
        assert_eq!(body["recommendations"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_analyze_all_upstream_down() {
        let (status, body) = post_json(
            app_with(StaticSource::default()),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["details"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_analyze_only_excluded_is_422() {
        let source = StaticSource::default().with_default(Category::Temperature, FixtureReading::new(500.0));
        let (status, _) = post_json(
            app_with(source),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060], "analysis_type": "temperature" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_analyze_rejects_unknown_type() {
        let (status, _) = post_json(
            app(),
            "/api/analyze",
            serde_json::json!({ "coordinates": [40.7128, -74.0060], "analysis_type": "seismic" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_heat_islands_area() {
        let (status, body) = post_json(
            app(),
            "/api/heat-islands",
            serde_json::json!({ "coordinates": square(), "name": "Lower Manhattan" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["area_id"], "Lower Manhattan");
        assert_eq!(body["category"], "temperature");
        assert_eq!(body["target"]["kind"], "area");
        assert_eq!(body["target"]["sample_count"], 5);
        assert_eq!(body["sample_points"].as_array().unwrap().len(), 5);
        // Uniform fixture: area equals any single point
        assert_eq!(body["ml_analysis"]["overall_risk_score"], 62.5);
        assert_eq!(body["missing_categories"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_air_quality_area_default_name() {
        let (status, body) = post_json(
            app(),
            "/api/air-quality-analysis",
            serde_json::json!({ "coordinates": square() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["area_id"].as_str().unwrap().starts_with("air-quality-"));
        assert_eq!(body["ml_analysis"]["air_quality_risk"]["level"], "Moderate");
    }

    #[tokio::test]
    async fn test_area_rejects_degenerate_polygon() {
        let (status, _) = post_json(
            app(),
            "/api/heat-islands",
            serde_json::json!({ "coordinates": [[40.70, -74.02], [40.72, -74.00]] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_grounded_fallback() {
        let (status, body) = post_json(
            app(),
            "/api/chat",
            serde_json::json!({ "message": "Where should we plant trees?", "context": { "coordinates": [40.7128, -74.0060] } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["grounded"], true);
        assert!(body["response"].as_str().unwrap().contains("Urban Forest Expansion"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let (status, _) = post_json(app(), "/api/chat", serde_json::json!({ "message": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cache_stats_and_clear() {
        let app = app();
        let (status, _) = get_json(app.clone(), "/api/nasa/temperature?lat=40.7128&lng=-74.0060").await;
        assert_eq!(status, StatusCode::OK);

        let (_, stats) = get_json(app.clone(), "/api/cache/stats").await;
        assert_eq!(stats["valid"], 1);

        let (_, cleared) = post_json(app.clone(), "/api/cache/clear", serde_json::json!({})).await;
        assert_eq!(cleared["cleared"], 1);

        let (_, stats) = get_json(app, "/api/cache/stats").await;
        assert_eq!(stats["total"], 0);
    }
}
