//! Conversational answers grounded on a risk ContextPayload.
//!
//! Uses the Gemini `generateContent` REST endpoint when an API key is
//! configured. Any failure (no key, HTTP error, timeout, empty answer)
//! degrades to a templated answer built from the same payload.

use risk_engine::recommendations::Recommendation;
use risk_engine::{Category, ContextPayload};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const PREAMBLE: &str = "You are an urban climate resilience advisor. Answer the planner's question \
using only the environmental risk data below. Be concise and cite the numbers you rely on.";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Gemini API key not configured")]
    NotConfigured,
    #[error("Gemini request failed: {0}")]
    Request(String),
    #[error("Gemini returned status {0}")]
    Api(u16),
    #[error("Gemini returned no text")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Gemini,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub source: ReplySource,
    /// Whether a risk payload was used as context
    pub grounded: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

pub struct ChatService {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl ChatService {
    pub fn new(api_key: Option<String>, model: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn answer(&self, message: &str, context: Option<&ContextPayload>) -> ChatReply {
        let prompt = build_prompt(message, context);
        match self.generate(&prompt).await {
            Ok(response) => ChatReply {
                response,
                source: ReplySource::Gemini,
                grounded: context.is_some(),
            },
            Err(e) => {
                match e {
                    ChatError::NotConfigured => debug!("Conversational service not configured, using fallback"),
                    _ => warn!("Conversational service unavailable, using fallback: {}", e),
                }
                ChatReply {
                    response: fallback_answer(message, context),
                    source: ReplySource::Fallback,
                    grounded: context.is_some(),
                }
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::NotConfigured)?;
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Api(response.status().as_u16()));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        data.text().ok_or(ChatError::EmptyResponse)
    }
}

fn build_prompt(message: &str, context: Option<&ContextPayload>) -> String {
    match context {
        Some(payload) => format!(
            "{}\n\n--- Risk data ---\n{}\n--- Question ---\n{}",
            PREAMBLE,
            payload.grounding_text(),
            message
        ),
        None => format!("{}\n\nNo location has been analysed yet.\n\n--- Question ---\n{}", PREAMBLE, message),
    }
}

/// Which category a question is about, by whole-word keyword (plural `s` allowed)
fn topic(message: &str) -> Option<Category> {
    let m = message.to_lowercase();
    let tokens: Vec<&str> = m.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    let mentions = |words: &[&str]| {
        tokens
            .iter()
            .any(|t| words.iter().any(|w| *t == *w || t.strip_suffix('s') == Some(*w)))
    };

    if mentions(&["heat", "heatwave", "temperature", "hot", "hotter", "cool", "cooling"]) {
        Some(Category::Temperature)
    } else if mentions(&["air", "pollution", "no2", "no₂", "emission", "smog"]) {
        Some(Category::AirQuality)
    } else if mentions(&["vegetation", "green", "tree", "ndvi", "park"]) {
        Some(Category::Vegetation)
    } else if mentions(&["flood", "flooding", "rain", "rainfall", "precipitation", "storm", "drought"]) {
        Some(Category::Precipitation)
    } else {
        None
    }
}

fn list_recommendations(text: &mut String, recs: &[&Recommendation]) {
    if recs.is_empty() {
        let _ = writeln!(text, "No mitigation actions are triggered at the current risk levels.");
        return;
    }
    let _ = writeln!(text, "Recommended actions:");
    for (i, rec) in recs.iter().take(3).enumerate() {
        let _ = writeln!(
            text,
            "{}. {} ({:?} priority): {} Impact: {}. Timeline: {}.",
            i + 1,
            rec.title,
            rec.priority,
            rec.description,
            rec.impact_estimate,
            rec.timeline_estimate
        );
    }
}

/// Templated answer used when the conversational service is unavailable
pub fn fallback_answer(message: &str, context: Option<&ContextPayload>) -> String {
    let Some(payload) = context else {
        return "I can explain heat, air quality, vegetation and flood risk for a location. \
                Include coordinates in the chat context (or call /api/analyze) so I can ground \
                the answer in current observations."
            .to_string();
    };

    let mut text = String::new();
    let _ = writeln!(text, "Environmental risk for {}:", payload.target.label());

    match topic(message) {
        Some(category) => {
            match payload.ml_analysis.risks.get(category.risk_key()) {
                Some(risk) => {
                    let _ = writeln!(
                        text,
                        "{} risk is {} with a score of {:.1}/100, contributing {:.1} points to the overall score of {:.1}.",
                        category, risk.level, risk.score, risk.contribution, payload.ml_analysis.overall_risk_score
                    );
                }
                None => {
                    let _ = writeln!(text, "No usable {} data is available for this location right now.", category);
                }
            }
            let recs: Vec<&Recommendation> = payload
                .recommendations
                .iter()
                .filter(|r| r.risk_category == category)
                .collect();
            list_recommendations(&mut text, &recs);
        }
        None => {
            let _ = writeln!(
                text,
                "Overall risk is {} ({:.1}/100).",
                payload.ml_analysis.overall_level, payload.ml_analysis.overall_risk_score
            );
            for (key, risk) in &payload.ml_analysis.risks {
                let _ = writeln!(text, "- {}: {} ({:.1})", key, risk.level, risk.score);
            }
            if !payload.missing_categories.is_empty() {
                let missing: Vec<&str> = payload.missing_categories.iter().map(|c| c.as_str()).collect();
                let _ = writeln!(text, "Unavailable data: {}.", missing.join(", "));
            }
            let recs: Vec<&Recommendation> = payload.recommendations.iter().collect();
            list_recommendations(&mut text, &recs);
        }
    }
    text
}
