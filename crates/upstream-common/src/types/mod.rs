//! Common types used across Upstream
//!
//! - [`measurement`]: sensor definitions and measurement rows read from CSV
//! - [`upload`]: per-chunk upload results and the aggregated summary
//! - [`dataset`]: the desired change to a catalog dataset's metadata

pub mod dataset;
pub mod measurement;
pub mod upload;

pub use dataset::{format_extra_timestamp, DatasetPatch, PatchMode};
pub use measurement::{MeasurementFrame, MeasurementRow, SensorDefinition};
pub use upload::{ChunkStatus, UploadOutcome, UploadResult, UploadSummary};
