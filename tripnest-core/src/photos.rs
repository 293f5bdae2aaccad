//! Photo discovery API: random destination photos from Unsplash.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::error::TripnestError;
use crate::models::DiscoveryPhoto;

#[async_trait]
pub trait PhotoSource: Send + Sync {
    async fn fetch_random_photos(
        &self,
        query: &str,
        count: u32,
    ) -> Result<Vec<DiscoveryPhoto>, PhotoError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Photo API rate limit exceeded")]
    RateLimited,

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,
}

impl From<PhotoError> for TripnestError {
    fn from(e: PhotoError) -> Self {
        match e {
            PhotoError::RateLimited => TripnestError::RateLimited(e.to_string()),
            PhotoError::Api { code: 401, .. } | PhotoError::Api { code: 403, .. } => {
                TripnestError::PermissionDenied(e.to_string())
            }
            PhotoError::MissingApiKey => TripnestError::Other(e.to_string()),
            PhotoError::Api { .. } | PhotoError::Http(_) => TripnestError::Network(e.to_string()),
        }
    }
}

// ============================================================================
// Unsplash API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    id: String,
    urls: UnsplashUrls,
    #[serde(default)]
    alt_description: Option<String>,
    #[serde(default)]
    location: Option<UnsplashLocation>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    regular: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashLocation {
    #[serde(default)]
    name: Option<String>,
}

impl From<UnsplashPhoto> for DiscoveryPhoto {
    fn from(p: UnsplashPhoto) -> Self {
        DiscoveryPhoto {
            id: p.id,
            url: p.urls.regular,
            alt_description: p.alt_description,
            location: p.location.and_then(|l| l.name),
            description: None,
            category: None,
        }
    }
}

// ============================================================================
// UnsplashClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct UnsplashClient {
    client: Client,
    access_key: String,
    base_url: String,
    orientation: String,
}

impl UnsplashClient {
    pub fn new(
        access_key: Option<String>,
        base_url: String,
        orientation: String,
    ) -> Result<Self, PhotoError> {
        let access_key = access_key
            .or_else(|| std::env::var("UNSPLASH_ACCESS_KEY").ok())
            .unwrap_or_default();
        if access_key.is_empty() {
            return Err(PhotoError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(20)).build()?;

        Ok(Self {
            client,
            access_key,
            base_url,
            orientation,
        })
    }
}

#[async_trait]
impl PhotoSource for UnsplashClient {
    async fn fetch_random_photos(
        &self,
        query: &str,
        count: u32,
    ) -> Result<Vec<DiscoveryPhoto>, PhotoError> {
        let url = format!("{}/photos/random", self.base_url);
        let count = count.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("count", count.as_str()),
                ("orientation", self.orientation.as_str()),
                ("client_id", self.access_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Unsplash API error");
            if status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN && body.contains("Rate Limit"))
            {
                return Err(PhotoError::RateLimited);
            }
            return Err(PhotoError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        let photos: Vec<UnsplashPhoto> = response.json().await?;
        Ok(photos.into_iter().map(DiscoveryPhoto::from).collect())
    }

    fn name(&self) -> &str {
        "unsplash"
    }
}

/// Stand-in when no access key is configured; every fetch fails.
pub struct DisabledPhotoSource;

#[async_trait]
impl PhotoSource for DisabledPhotoSource {
    async fn fetch_random_photos(
        &self,
        _query: &str,
        _count: u32,
    ) -> Result<Vec<DiscoveryPhoto>, PhotoError> {
        Err(PhotoError::MissingApiKey)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
