//! Configuration management for the Upstream CLI
//!
//! Settings come from an optional YAML file, overlaid with environment
//! variables. The resulting [`Config`] is passed explicitly to each component;
//! nothing is read from process-wide state after loading.

use crate::chunk::{ChunkLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_ROWS};
use crate::error::{CliError, Result};
use crate::publish::PublishSettings;
use crate::retry::RetryPolicy;
use crate::upload::executor::DEFAULT_MAX_PARALLEL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use upstream_common::UpstreamError;

// ============================================================================
// CLI Configuration Constants
// ============================================================================

/// Environment variables read by [`Config::apply_env`], for help output
pub const ENV_VARS: &[(&str, &str)] = &[
    ("UPSTREAM_BASE_URL", "Platform URL"),
    ("UPSTREAM_ACCESS_TOKEN", "Platform bearer token"),
    ("CKAN_URL", "CKAN instance URL"),
    ("CKAN_API_KEY", "CKAN API key"),
    ("CKAN_AUTO_PUBLISH", "Make datasets public after publishing (true/false)"),
    ("CKAN_ORGANIZATION", "Organization owning new datasets"),
    ("UPSTREAM_CHUNK_SIZE", "Rows per upload chunk"),
    ("UPSTREAM_MAX_CHUNK_SIZE_MB", "Serialized megabytes per upload chunk"),
    ("UPSTREAM_RETRY_ATTEMPTS", "Retries per request after the first attempt"),
    ("UPSTREAM_TIMEOUT_SECONDS", "Per-request timeout for chunk uploads"),
    ("UPSTREAM_MAX_PARALLEL", "Chunks uploaded concurrently"),
];

/// CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: PlatformSettings,
    pub ckan: CkanSettings,
    pub upload: UploadSettings,
}

/// Sensor-data platform connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// CKAN catalog connection and publishing behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CkanSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub auto_publish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_organization: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CkanSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            auto_publish: true,
            default_organization: None,
            timeout_seconds: 30,
        }
    }
}

impl CkanSettings {
    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            organization: self.default_organization.clone(),
            auto_publish: self.auto_publish,
        }
    }

    /// Retry behavior for catalog calls: upload retry counts and backoff,
    /// with the catalog's own timeout
    pub fn retry_policy(&self, upload: &UploadSettings) -> RetryPolicy {
        RetryPolicy {
            request_timeout: Duration::from_secs(self.timeout_seconds),
            ..upload.retry_policy()
        }
    }

    pub fn require_url(&self) -> std::result::Result<&str, UpstreamError> {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| UpstreamError::configuration("ckan.url", "set CKAN_URL or ckan.url in the config file"))
    }
}

/// Chunking, retry, and parallelism of uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Rows per chunk
    pub chunk_size: usize,
    pub max_chunk_size_mb: u64,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    pub timeout_seconds: u64,
    pub max_parallel: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            chunk_size: DEFAULT_MAX_ROWS,
            max_chunk_size_mb: (DEFAULT_MAX_BYTES / (1024 * 1024)) as u64,
            retry_attempts: retry.max_retries,
            timeout_seconds: retry.request_timeout.as_secs(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            backoff_base_ms: retry.base_delay.as_millis() as u64,
            backoff_max_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl UploadSettings {
    pub fn chunk_limits(&self) -> std::result::Result<ChunkLimits, UpstreamError> {
        let max_bytes = usize::try_from(self.max_chunk_size_mb)
            .ok()
            .and_then(|mb| mb.checked_mul(1024 * 1024))
            .ok_or_else(|| UpstreamError::invalid_field("max_chunk_size_mb", "value is too large"))?;
        ChunkLimits::new(self.chunk_size, max_bytes)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            request_timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

impl Config {
    /// Load from `path` (if given), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CliError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Overlay variables returned by `lookup`; unset variables change nothing
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("UPSTREAM_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(token) = get("UPSTREAM_ACCESS_TOKEN") {
            self.upstream.access_token = Some(token);
        }
        if let Some(url) = get("CKAN_URL") {
            self.ckan.url = Some(url);
        }
        if let Some(key) = get("CKAN_API_KEY") {
            self.ckan.api_key = Some(key);
        }
        if let Some(org) = get("CKAN_ORGANIZATION") {
            self.ckan.default_organization = Some(org);
        }
        if let Some(value) = get("CKAN_AUTO_PUBLISH") {
            self.ckan.auto_publish = parse_bool("CKAN_AUTO_PUBLISH", &value)?;
        }
        if let Some(value) = get("UPSTREAM_CHUNK_SIZE") {
            self.upload.chunk_size = parse_env("UPSTREAM_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = get("UPSTREAM_MAX_CHUNK_SIZE_MB") {
            self.upload.max_chunk_size_mb = parse_env("UPSTREAM_MAX_CHUNK_SIZE_MB", &value)?;
        }
        if let Some(value) = get("UPSTREAM_RETRY_ATTEMPTS") {
            self.upload.retry_attempts = parse_env("UPSTREAM_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("UPSTREAM_TIMEOUT_SECONDS") {
            self.upload.timeout_seconds = parse_env("UPSTREAM_TIMEOUT_SECONDS", &value)?;
        }
        if let Some(value) = get("UPSTREAM_MAX_PARALLEL") {
            self.upload.max_parallel = parse_env("UPSTREAM_MAX_PARALLEL", &value)?;
        }

        Ok(self)
    }

    /// Check values that would make components misbehave
    pub fn validate(&self) -> Result<()> {
        self.upload.chunk_limits()?;

        let positive = [
            ("upload.max_parallel", self.upload.max_parallel as u64),
            ("upload.timeout_seconds", self.upload.timeout_seconds),
            ("ckan.timeout_seconds", self.ckan.timeout_seconds),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(UpstreamError::invalid_field(*field, "must be greater than zero").into());
        }
        if self.upload.backoff_max_ms < self.upload.backoff_base_ms {
            return Err(UpstreamError::invalid_field(
                "upload.backoff_max_ms",
                "must not be smaller than upload.backoff_base_ms",
            )
            .into());
        }
        Ok(())
    }

    /// Platform URL and token, failing when either is missing
    pub fn require_platform(&self) -> std::result::Result<(&str, &str), UpstreamError> {
        let base_url = self.upstream.base_url.trim();
        if base_url.is_empty() {
            return Err(UpstreamError::configuration(
                "upstream.base_url",
                "set UPSTREAM_BASE_URL or upstream.base_url in the config file",
            ));
        }
        let token = self
            .upstream
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                UpstreamError::configuration(
                    "upstream.access_token",
                    "set UPSTREAM_ACCESS_TOKEN or upstream.access_token in the config file",
                )
            })?;
        Ok((base_url, token))
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| UpstreamError::configuration(key, format!("'{}' is not a valid number", value)).into())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(UpstreamError::configuration(key, format!("'{}' is not a boolean", value)).into()),
    }
}
