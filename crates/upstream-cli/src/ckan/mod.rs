//! CKAN catalog integration
//!
//! Wire types and an HTTP client for the CKAN action API, plus the pure
//! metadata reconciler used before every dataset update.

pub mod client;
pub mod reconcile;
pub mod types;

pub use client::{CkanApi, CkanClient};
pub use reconcile::{reconcile, ReconciledMetadata, MAX_EXTRAS_JSON_BYTES};
pub use types::*;
