//! Authenticated platform session
//!
//! A read-only handle shared by every concurrent chunk upload. Token refresh
//! is owned by whoever issues the token; the session only attaches it.

use crate::error::{CliError, Result};
use crate::transport::{check_status, TransportError};
use reqwest::multipart::Form;
use reqwest::{Client, Response};
use std::time::Duration;
use upstream_common::UpstreamError;

/// Bearer-authenticated client for the sensor-data platform
#[derive(Debug, Clone)]
pub struct PlatformSession {
    client: Client,
    base_url: String,
    access_token: String,
}

impl PlatformSession {
    /// Create a session for `base_url` using a bearer token
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let access_token = access_token.into();

        if base_url.trim().is_empty() {
            return Err(UpstreamError::configuration("upstream.base_url", "platform URL is required").into());
        }
        if access_token.trim().is_empty() {
            return Err(
                UpstreamError::configuration("upstream.access_token", "an access token is required").into(),
            );
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("upstream-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CliError::Http)?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    /// POST a multipart form with bearer authorization
    pub async fn post_multipart(&self, url: &str, form: Form) -> std::result::Result<Response, TransportError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;

        check_status(response).await
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
