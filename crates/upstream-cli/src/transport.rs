//! HTTP transport failures
//!
//! Every remote call reports failure as a [`TransportError`] so that retry
//! decisions can be made in one place (see [`crate::retry::classify`]).

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Longest response body kept in an error message
const MAX_BODY_IN_ERROR: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was reset
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request could not be built or sent
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportError::Connect(err.to_string())
        } else if err.is_decode() || err.is_body() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                retry_after: None,
                body: err.to_string(),
            }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Pass successful responses through; turn anything else into [`TransportError::Status`]
pub async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, retry_after, &body))
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> TransportError {
    let mut body = body.trim().to_string();
    if body.len() > MAX_BODY_IN_ERROR {
        let cut = (0..=MAX_BODY_IN_ERROR)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
        body.push_str("...");
    }
    if body.is_empty() {
        body = status.canonical_reason().unwrap_or("no response body").to_string();
    }

    TransportError::Status {
        status: status.as_u16(),
        retry_after,
        body,
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
