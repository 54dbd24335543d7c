//! Chunk sending capability
//!
//! The executor only needs "send this chunk"; [`HttpChunkSender`] is the
//! production implementation against the platform's bulk CSV endpoint.

use crate::api::types::{UploadCsvResponse, MEASUREMENTS_PART, SENSORS_PART};
use crate::api::{endpoints, PlatformSession};
use crate::chunk::Chunk;
use crate::transport::TransportError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

/// What the server reported for an accepted chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkAck {
    pub sensors_processed: usize,
    pub measurements_added: usize,
}

/// Sends one chunk. Implementations must be safe to call from concurrent tasks.
#[async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send(&self, chunk: &Chunk) -> Result<ChunkAck, TransportError>;
}

/// Uploads chunks of one station through an authenticated session.
///
/// The sensors file is attached to every request, so the server can process
/// chunks in any order.
pub struct HttpChunkSender {
    session: PlatformSession,
    url: String,
    sensors_csv: Vec<u8>,
}

impl HttpChunkSender {
    pub fn new(session: PlatformSession, campaign_id: &str, station_id: &str, sensors_csv: Vec<u8>) -> Self {
        let url = endpoints::upload_csv_url(session.base_url(), campaign_id, station_id);
        Self {
            session,
            url,
            sensors_csv,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn form(&self, chunk: &Chunk) -> Result<Form, TransportError> {
        let measurements = chunk
            .to_csv()
            .map_err(|e| TransportError::Other(format!("cannot serialize chunk: {}", e)))?;

        let sensors = Part::bytes(self.sensors_csv.clone())
            .file_name("sensors.csv")
            .mime_str("text/csv")?;
        let measurements = Part::bytes(measurements)
            .file_name(chunk.file_name())
            .mime_str("text/csv")?;

        Ok(Form::new()
            .part(SENSORS_PART, sensors)
            .part(MEASUREMENTS_PART, measurements))
    }
}

#[async_trait]
impl ChunkSender for HttpChunkSender {
    async fn send(&self, chunk: &Chunk) -> Result<ChunkAck, TransportError> {
        let form = self.form(chunk)?;
        let response = self.session.post_multipart(&self.url, form).await?;
        let body = response.text().await?;

        // The chunk is accepted once the status is 2xx; counts are informational.
        let parsed: UploadCsvResponse = serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::debug!(
                sequence_index = chunk.sequence_index(),
                error = %e,
                "Upload response is not the expected JSON"
            );
            UploadCsvResponse::default()
        });

        Ok(ChunkAck {
            sensors_processed: parsed.sensors_processed,
            measurements_added: parsed.measurements_added,
        })
    }
}
