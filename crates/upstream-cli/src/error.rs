//! Error types for the Upstream CLI
//!
//! User-facing errors with clear, actionable messages. Pipeline failures keep
//! their structured [`UpstreamError`] so callers can still reach the upload
//! summary or the offending extras keys.

use thiserror::Error;
use upstream_common::types::UploadSummary;
use upstream_common::UpstreamError;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Comprehensive error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Upload, publish, or validation failure from the pipelines
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Required file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outright
    #[error("Network request failed: {0}. Check your internet connection and server URL.")]
    Http(#[from] reqwest::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or config file.")]
    Config(String),

    /// YAML parsing failed
    #[error("Failed to parse YAML: {0}. Check the file syntax at the indicated line/column.")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Upload summary carried by a partial upload failure
    pub fn upload_summary(&self) -> Option<&UploadSummary> {
        match self {
            Self::Upstream(err) => err.upload_summary(),
            _ => None,
        }
    }

    /// Process exit code: 2 for input and configuration problems, 3 for an
    /// incomplete upload, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Upstream(UpstreamError::Upload { .. }) => 3,
            Self::Upstream(err) if err.is_validation() => 2,
            Self::Upstream(UpstreamError::Configuration { .. })
            | Self::Config(_)
            | Self::FileNotFound(_)
            | Self::YamlParse(_) => 2,
            _ => 1,
        }
    }
}
