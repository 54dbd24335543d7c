//! API request and response types
//!
//! Matches the platform's bulk CSV endpoint.

use serde::{Deserialize, Serialize};

/// Multipart part carrying the station's sensors file
pub const SENSORS_PART: &str = "upload_file_sensors";

/// Multipart part carrying one chunk of measurements
pub const MEASUREMENTS_PART: &str = "upload_file_measurements";

/// Response from the bulk CSV endpoint.
///
/// Counts default to zero when the server omits them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadCsvResponse {
    #[serde(default, alias = "total_sensors_processed")]
    pub sensors_processed: usize,

    #[serde(default, alias = "total_measurements_added")]
    pub measurements_added: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
