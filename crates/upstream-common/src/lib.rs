//! Upstream Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Upstream toolkit.
//!
//! # Overview
//!
//! This crate provides common functionality used across all Upstream workspace members:
//!
//! - **Error Handling**: The error taxonomy shared by the upload and publish pipelines
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: Sensor, measurement, upload, and dataset-metadata records
//!
//! # Example
//!
//! ```no_run
//! use upstream_common::types::{DatasetPatch, PatchMode};
//!
//! let patch = DatasetPatch::new(PatchMode::Merge)
//!     .with_tag("environmental")
//!     .with_extra("source", "Upstream Platform");
//! assert_eq!(patch.tags.len(), 1);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, UpstreamError};
