use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error classes shown to the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Validation,
    Network,
    RateLimited,
    QuotaExceeded,
    Upload,
    InvalidCredentials,
    Internal,
}

#[derive(Error, Debug)]
pub enum TripnestError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),

    /// An error already captured in a cache entry or mutation handle.
    #[error("{0}")]
    Reported(ErrorInfo),
}

impl TripnestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TripnestError::NotFound(_) => ErrorKind::NotFound,
            TripnestError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            TripnestError::Validation(_) => ErrorKind::Validation,
            TripnestError::Network(_) => ErrorKind::Network,
            TripnestError::RateLimited(_) => ErrorKind::RateLimited,
            TripnestError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            TripnestError::Upload(_) => ErrorKind::Upload,
            TripnestError::InvalidCredentials => ErrorKind::InvalidCredentials,
            TripnestError::Reported(info) => info.kind,
            TripnestError::Database(_)
            | TripnestError::Config(_)
            | TripnestError::Io(_)
            | TripnestError::Ipc(_)
            | TripnestError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        if let TripnestError::Reported(info) = self {
            return info.clone();
        }
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serializable snapshot of an error, retained in cache entries and mutation handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ErrorInfo> for TripnestError {
    fn from(info: ErrorInfo) -> Self {
        TripnestError::Reported(info)
    }
}

pub type TripnestResult<T> = Result<T, TripnestError>;
