//! Upload executor
//!
//! Sends planned chunks to the platform with bounded parallelism and
//! per-chunk retry, then aggregates one summary once every chunk settles.

pub mod executor;
pub mod sender;

pub use executor::UploadExecutor;
pub use sender::{ChunkAck, ChunkSender, HttpChunkSender};
