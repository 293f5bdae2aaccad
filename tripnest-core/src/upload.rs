//! Object storage upload for itinerary cover images.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::UploadConfig;
use crate::error::TripnestError;

/// A file staged for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a local image; the content type is inferred from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::Read(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = content_type_for(path);
        Ok(Self::new(file_name, content_type, Bytes::from(data)))
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload and return the public URL of the stored object.
    async fn upload(&self, file: UploadFile) -> Result<String, UploadError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Upload response missing secure_url")]
    MissingUrl,

    #[error("Could not read file {0}")]
    Read(String),

    #[error("Uploader not configured: {0}")]
    NotConfigured(&'static str),
}

impl From<UploadError> for TripnestError {
    fn from(e: UploadError) -> Self {
        TripnestError::Upload(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

// ============================================================================
// CloudinaryUploader
// ============================================================================

/// Unsigned uploads through a Cloudinary upload preset.
#[derive(Debug, Clone)]
pub struct CloudinaryUploader {
    client: Client,
    base_url: String,
    cloud_name: String,
    upload_preset: String,
}

impl CloudinaryUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let cloud_name = non_empty(&config.cloud_name)
            .or_else(|| std::env::var("CLOUDINARY_CLOUD_NAME").ok())
            .ok_or(UploadError::NotConfigured("cloud_name"))?;
        let upload_preset = non_empty(&config.upload_preset)
            .or_else(|| std::env::var("CLOUDINARY_UPLOAD_PRESET").ok())
            .ok_or(UploadError::NotConfigured("upload_preset"))?;

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            cloud_name,
            upload_preset,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[async_trait]
impl ObjectUploader for CloudinaryUploader {
    async fn upload(&self, file: UploadFile) -> Result<String, UploadError> {
        let url = format!("{}/{}/image/upload", self.base_url, self.cloud_name);
        let size = file.bytes.len();

        let part = Part::stream(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone());

        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), message = %message, "Image upload rejected");
            return Err(UploadError::Rejected {
                code: status.as_u16(),
                message,
            });
        }

        let body: UploadResponse = response.json().await?;
        let secure_url = body.secure_url.ok_or(UploadError::MissingUrl)?;
        tracing::info!(bytes = size, url = %secure_url, "Image uploaded");
        Ok(secure_url)
    }

    fn name(&self) -> &str {
        "cloudinary"
    }
}

/// Used when no uploader is configured: every upload fails with `NotConfigured`.
pub struct DisabledUploader;

#[async_trait]
impl ObjectUploader for DisabledUploader {
    async fn upload(&self, _file: UploadFile) -> Result<String, UploadError> {
        Err(UploadError::NotConfigured("cloud_name"))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
