//! Platform API module
//!
//! Authenticated session, URL builders, and wire types for the sensor-data
//! platform's bulk CSV endpoint.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::PlatformSession;
pub use types::*;
