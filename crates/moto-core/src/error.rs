use std::fmt;

use thiserror::Error;

use crate::conversation::InputError;
use crate::models::ListingStatus;

/// Step of listing assembly a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    CreateDraft,
    AcquireMedia,
    AttachPhotos,
    Reload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::CreateDraft => "create draft",
            Stage::AcquireMedia => "acquire media",
            Stage::AttachPhotos => "attach photos",
            Stage::Reload => "reload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-wide error types.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request could not be built or its body could not be read.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Remote answered with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Fetched document could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A single photo of a batch failed; the whole batch is abandoned.
    #[error("Failed to acquire photo {index}: {message}")]
    MediaError { index: usize, message: String },

    /// Object storage rejected a write.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with current state (e.g. a pending conversation,
    /// or a listing whose status changed underneath us).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller supplied a value the listing cannot take.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InputError),

    #[error("Listing cannot move from {from} to {to}")]
    InvalidTransition {
        from: ListingStatus,
        to: ListingStatus,
    },

    /// Operator messaging transport failed.
    #[error("Messaging error: {0}")]
    MessagingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Listing assembly failed at the given stage.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Wrap an error with the assembly stage it happened in.
    pub fn at(stage: Stage, source: AppError) -> Self {
        AppError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Returns the assembly stage, if this error carries one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AppError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            AppError::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the vendor page could not be fetched or parsed.
    pub fn is_extraction_failure(&self) -> bool {
        match self {
            AppError::HttpError(_)
            | AppError::HttpStatus { .. }
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::ParseError(_) => true,
            AppError::Stage { stage, .. } => *stage == Stage::Extract,
            _ => false,
        }
    }
}
