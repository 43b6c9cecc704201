use anyhow::{Context, Result};
use earth_observation::{ObservationFetcher, ObservationSource, OpenMeteoSource, StaticSource};
use risk_engine::{EngineConfig, RiskEngine};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chat;
mod config;
mod error;
mod routes;

use chat::ChatService;
use config::{GatewayConfig, Provider};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RiskEngine>,
    pub fetcher: Arc<ObservationFetcher>,
    pub chat: Arc<ChatService>,
}

fn build_source(config: &GatewayConfig) -> Result<Arc<dyn ObservationSource>> {
    let timeout = Duration::from_millis(config.fetch.timeout_ms);
    let source: Arc<dyn ObservationSource> = match (&config.provider, &config.fixtures) {
        (Provider::Static, Some(path)) => Arc::new(StaticSource::from_json_file(path)?),
        (Provider::Static, None) => Arc::new(StaticSource::sample()),
        (Provider::OpenMeteo, _) => Arc::new(OpenMeteoSource::new(timeout)?),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "urban_risk_gateway=debug,tower_http=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;

    let engine_config = match &config.engine_config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading engine configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = RiskEngine::new(engine_config)?;

    let source = build_source(&config)?;
    tracing::info!("   Observation provider: {}", source.name());
    let fetcher = Arc::new(ObservationFetcher::new(source, config.fetch.clone()));

    let chat = ChatService::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        Duration::from_millis(config.fetch.timeout_ms.max(15_000)),
    )?;
    if chat.is_configured() {
        tracing::info!("   Conversational service: Gemini ({})", config.gemini_model);
    } else {
        tracing::warn!("   GEMINI_API_KEY not set - chat answers use the templated fallback");
    }

    // Periodic cache purge
    let purge_fetcher = fetcher.clone();
    let purge_every = Duration::from_secs(config.fetch.cache_ttl_sec.max(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge_fetcher.purge_expired().await;
        }
    });

    let state = AppState {
        engine: Arc::new(engine),
        fetcher,
        chat: Arc::new(chat),
    };

    let app = routes::api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🌆 Urban Risk Gateway starting on {}", addr);
    tracing::info!("   Cache TTL: {}s, per-category timeout: {}ms", config.fetch.cache_ttl_sec, config.fetch.timeout_ms);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
