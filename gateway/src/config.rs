//! Environment-driven gateway configuration

use anyhow::{bail, Context, Result};
use earth_observation::FetchConfig;
use std::path::PathBuf;

pub const DEFAULT_PORT: &str = "18700";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    OpenMeteo,
    Static,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: String,
    pub provider: Provider,
    pub fixtures: Option<PathBuf>,
    pub engine_config: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("URBAN_RISK_PORT")
            .or_else(|| get("PORT"))
            .unwrap_or_else(|| DEFAULT_PORT.to_string());

        let fixtures = get("URBAN_RISK_FIXTURES").map(PathBuf::from);
        let provider = match get("URBAN_RISK_PROVIDER").as_deref() {
            Some("open-meteo") | Some("open_meteo") => Provider::OpenMeteo,
            Some("static") => Provider::Static,
            Some(other) => bail!("unknown URBAN_RISK_PROVIDER '{}' (expected open-meteo or static)", other),
            // A fixture file implies offline mode
            None if fixtures.is_some() => Provider::Static,
            None => Provider::OpenMeteo,
        };

        let mut fetch = FetchConfig::default();
        if let Some(ttl) = get("URBAN_RISK_CACHE_TTL_SEC") {
            fetch.cache_ttl_sec = ttl
                .parse()
                .with_context(|| format!("invalid URBAN_RISK_CACHE_TTL_SEC '{}'", ttl))?;
        }
        if let Some(timeout) = get("URBAN_RISK_FETCH_TIMEOUT_MS") {
            fetch.timeout_ms = timeout
                .parse()
                .with_context(|| format!("invalid URBAN_RISK_FETCH_TIMEOUT_MS '{}'", timeout))?;
        }

        Ok(Self {
            port,
            provider,
            fixtures,
            engine_config: get("URBAN_RISK_ENGINE_CONFIG").map(PathBuf::from),
            fetch,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GatewayConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(c.provider, Provider::OpenMeteo);
        assert!(c.gemini_api_key.is_none());
        assert_eq!(c.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(c.fetch.cache_ttl_sec, FetchConfig::default().cache_ttl_sec);
    }

    #[test]
    fn test_port_precedence() {
        assert_eq!(config(&[("PORT", "9000")]).unwrap().port, "9000");
        assert_eq!(
            config(&[("PORT", "9000"), ("URBAN_RISK_PORT", "9100")]).unwrap().port,
            "9100"
        );
    }

    #[test]
    fn test_fixtures_imply_static() {
        let c = config(&[("URBAN_RISK_FIXTURES", "fixtures.json")]).unwrap();
        assert_eq!(c.provider, Provider::Static);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("URBAN_RISK_PROVIDER", "landsat")]).is_err());
        assert!(config(&[("URBAN_RISK_CACHE_TTL_SEC", "soon")]).is_err());
    }

    #[test]
    fn test_blank_key_is_unset() {
        let c = config(&[("GEMINI_API_KEY", "  "), ("URBAN_RISK_FETCH_TIMEOUT_MS", "2500")]).unwrap();
        assert!(c.gemini_api_key.is_none());
        assert_eq!(c.fetch.timeout_ms, 2500);
    }
}
