//! Error types for Upstream
//!
//! Every failure surfaced by the upload and publish pipelines maps to one of
//! these variants. Transient network failures never appear here directly: they
//! are retried inside the pipelines and only surface as [`UpstreamError::Upload`]
//! or [`UpstreamError::Api`] once retries are exhausted.

use crate::types::UploadSummary;
use thiserror::Error;

/// Result type alias for Upstream operations
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Main error type for Upstream
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Input data or metadata is malformed. Fixable by the caller, never retried.
    #[error("Validation failed{}: {message}", .field.as_ref().map(|f| format!(" for '{}'", f)).unwrap_or_default())]
    Validation {
        field: Option<String>,
        message: String,
    },

    /// Combined extras would overflow the catalog's search index field.
    #[error("Extras metadata serializes to {total_bytes} bytes, over the {limit}-byte limit; offending key(s): {}", .keys.join(", "))]
    ExtrasTooLarge {
        keys: Vec<String>,
        total_bytes: usize,
        limit: usize,
    },

    /// One or more chunks did not succeed. The summary lists exactly which.
    #[error("Upload incomplete: {}", .summary.describe())]
    Upload { summary: Box<UploadSummary> },

    /// Required configuration is missing or invalid. Fatal.
    #[error("Configuration error{}: {message}", .key.as_ref().map(|k| format!(" ({})", k)).unwrap_or_default())]
    Configuration {
        key: Option<String>,
        message: String,
    },

    /// A remote API call failed permanently.
    #[error("API error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Api {
        status: Option<u16>,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Create a validation error without a field
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: msg.into(),
        }
    }

    /// Create a validation error for a named field or column
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a config key
    pub fn configuration(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            key: Some(key.into()),
            message: msg.into(),
        }
    }

    /// Create an API error
    pub fn api(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: msg.into(),
        }
    }

    /// Wrap an upload summary that contains failed or cancelled chunks
    pub fn upload(summary: UploadSummary) -> Self {
        Self::Upload {
            summary: Box::new(summary),
        }
    }

    /// True for errors the caller fixes by correcting input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::ExtrasTooLarge { .. })
    }

    /// The partial upload summary, when this is an upload failure
    pub fn upload_summary(&self) -> Option<&UploadSummary> {
        match self {
            Self::Upload { summary } => Some(summary),
            _ => None,
        }
    }
}
