//! Text enrichment for discovery photos
//!
//! Provides a `TextEnricher` trait with implementations for:
//! - **Gemini**: structured `{description, category}` output via `generateContent`
//! - **Fallback**: wraps another enricher and degrades to a deterministic
//!   description instead of failing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::EnrichmentConfig;
use crate::error::TripnestError;
use crate::models::{Category, DiscoveryPhoto};

// ============================================================================
// TextEnricher trait
// ============================================================================

/// Generated copy for one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub description: String,
    pub category: Category,
}

#[async_trait]
pub trait TextEnricher: Send + Sync {
    async fn generate_description(&self, prompt: &str) -> Result<Enrichment, EnrichmentError>;

    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Enrich a photo, falling back to its alt text and `fallback` on any error.
    async fn enrich_photo(&self, photo: DiscoveryPhoto, fallback: Category) -> DiscoveryPhoto {
        match self.generate_description(&photo.enrichment_prompt()).await {
            Ok(e) => photo.enriched(e.description, e.category),
            Err(e) => {
                tracing::warn!(
                    photo_id = %photo.id,
                    backend = self.name(),
                    error = %e,
                    "Enrichment failed, using alt description"
                );
                photo.with_fallback(fallback)
            }
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Generation quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Response contained no generated text")]
    MissingContent,

    #[error("Generated text is not a valid enrichment: {0}")]
    Malformed(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl EnrichmentError {
    fn is_retryable(&self) -> bool {
        match self {
            EnrichmentError::Http(_) => true,
            EnrichmentError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

impl From<EnrichmentError> for TripnestError {
    fn from(e: EnrichmentError) -> Self {
        match e {
            EnrichmentError::QuotaExceeded(_) => TripnestError::QuotaExceeded(e.to_string()),
            EnrichmentError::Http(_) | EnrichmentError::RetryExhausted { .. } => {
                TripnestError::Network(e.to_string())
            }
            _ => TripnestError::Other(e.to_string()),
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnrichment {
    description: String,
    category: String,
}

fn request_body(prompt: &str) -> serde_json::Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "description": { "type": "STRING" },
                    "category": { "type": "STRING" }
                },
                "required": ["description", "category"]
            }
        }
    })
}

fn parse_generated(response: GenerateResponse) -> Result<Enrichment, EnrichmentError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or(EnrichmentError::MissingContent)?;

    let raw: RawEnrichment =
        serde_json::from_str(&text).map_err(|e| EnrichmentError::Malformed(e.to_string()))?;
    if raw.description.trim().is_empty() {
        return Err(EnrichmentError::Malformed("empty description".to_string()));
    }
    Ok(Enrichment {
        description: raw.description,
        category: Category::from_label(&raw.category),
    })
}

// ============================================================================
// GeminiEnrichmentClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiEnrichmentClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl GeminiEnrichmentClient {
    /// Reads `GEMINI_API_KEY` (then `GOOGLE_API_KEY`) when `api_key` is `None`.
    pub fn new(api_key: Option<String>, config: &EnrichmentConfig) -> Result<Self, EnrichmentError> {
        let api_key = api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Err(EnrichmentError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<Enrichment, EnrichmentError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let quota = status.as_u16() == 429
                || detail
                    .as_ref()
                    .and_then(|d| d.status.as_deref())
                    .is_some_and(|s| s == "RESOURCE_EXHAUSTED");

            let (code, message) = detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            if quota {
                return Err(EnrichmentError::QuotaExceeded(message));
            }
            return Err(EnrichmentError::Api { code, message });
        }

        parse_generated(response.json().await?)
    }
}

#[async_trait]
impl TextEnricher for GeminiEnrichmentClient {
    async fn generate_description(&self, prompt: &str) -> Result<Enrichment, EnrichmentError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let result = RetryIf::start(
            retry_strategy,
            || self.generate_once(prompt),
            |e: &EnrichmentError| e.is_retryable(),
        )
        .await;

        match result {
            Ok(enrichment) => Ok(enrichment),
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    attempts = self.max_retries + 1,
                    error = %e,
                    "All enrichment retry attempts failed"
                );
                Err(EnrichmentError::RetryExhausted {
                    attempts: self.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// FallbackEnricher
// ============================================================================

/// Wraps an optional enricher. With no inner backend (no API key configured)
/// every call fails fast, so `enrich_photo` always takes the fallback path.
pub struct FallbackEnricher {
    inner: Option<Arc<dyn TextEnricher>>,
}

impl FallbackEnricher {
    pub fn new(inner: Option<Arc<dyn TextEnricher>>) -> Self {
        Self { inner }
    }

    /// Build from config; a missing API key yields a disabled enricher.
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        match GeminiEnrichmentClient::new(None, config) {
            Ok(client) => Self::new(Some(Arc::new(client))),
            Err(e) => {
                tracing::warn!(error = %e, "Enrichment disabled, photos keep their alt text");
                Self::new(None)
            }
        }
    }
}

#[async_trait]
impl TextEnricher for FallbackEnricher {
    async fn generate_description(&self, prompt: &str) -> Result<Enrichment, EnrichmentError> {
        match &self.inner {
            Some(inner) => inner.generate_description(prompt).await,
            None => Err(EnrichmentError::MissingApiKey),
        }
    }

    fn name(&self) -> &str {
        match &self.inner {
            Some(inner) => inner.name(),
            None => "disabled",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, max_retries: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            base_url,
            model: "gemini-2.5-flash".to_string(),
            max_retries,
            retry_delay_ms: 10,
            fallback_category: "General".to_string(),
        }
    }

    fn generated(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    fn photo() -> DiscoveryPhoto {
        DiscoveryPhoto {
            id: "p1".to_string(),
            url: "https://img/p1".to_string(),
            alt_description: Some("white houses above the sea".to_string()),
            location: Some("Santorini, Greece".to_string()),
            description: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn test_generate_description_parses_structured_output() {
        let mock_server = MockServer::start().await;
        let client = GeminiEnrichmentClient::new(
            Some("test-key".to_string()),
            &test_config(mock_server.uri(), 2),
        )
        .unwrap();

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated(
                r#"{"description":"Sunsets over Santorini's caldera.","category":"romance"}"#,
            )))
            .mount(&mock_server)
            .await;

        let e = client.generate_description("prompt").await.unwrap();
        assert_eq!(e.description, "Sunsets over Santorini's caldera.");
        assert_eq!(e.category, Category::Romance);
    }

    #[tokio::test]
    async fn test_quota_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = GeminiEnrichmentClient::new(
            Some("test-key".to_string()),
            &test_config(mock_server.uri(), 3),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.generate_description("prompt").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::QuotaExceeded(_)));
        assert!(matches!(
            TripnestError::from(err),
            TripnestError::QuotaExceeded(_)
        ));
    }

    #[tokio::test]
    async fn test_retries_on_500_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = GeminiEnrichmentClient::new(
            Some("test-key".to_string()),
            &test_config(mock_server.uri(), 2),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": 500, "message": "Internal error" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated(
                r#"{"description":"Hiking trails.","category":"Adventure"}"#,
            )))
            .mount(&mock_server)
            .await;

        let e = client.generate_description("prompt").await.unwrap();
        assert_eq!(e.category, Category::Adventure);
    }

    #[tokio::test]
    async fn test_malformed_generated_text() {
        let mock_server = MockServer::start().await;
        let client = GeminiEnrichmentClient::new(
            Some("test-key".to_string()),
            &test_config(mock_server.uri(), 0),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generated("not json")))
            .mount(&mock_server)
            .await;

        let err = client.generate_description("prompt").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_enrich_photo_falls_back_on_error() {
        let mock_server = MockServer::start().await;
        let client = GeminiEnrichmentClient::new(
            Some("test-key".to_string()),
            &test_config(mock_server.uri(), 0),
        )
        .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&mock_server)
            .await;

        let p = client.enrich_photo(photo(), Category::General).await;
        assert_eq!(p.description.as_deref(), Some("white houses above the sea"));
        assert_eq!(p.category, Some(Category::General));
    }

    #[tokio::test]
    async fn test_disabled_fallback_enricher_degrades() {
        let enricher = FallbackEnricher::new(None);
        assert_eq!(enricher.name(), "disabled");
        let p = enricher.enrich_photo(photo(), Category::General).await;
        assert_eq!(p.category, Some(Category::General));
        assert_eq!(p.id, "p1");
    }
}
