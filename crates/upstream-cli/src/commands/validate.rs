//! `upstream validate` command implementation
//!
//! Reads and chunks a station's files without contacting any server.

use crate::chunk::{self, ChunkLimits};
use crate::config::Config;
use crate::error::Result;
use crate::frame;
use crate::progress::format_bytes;
use colored::Colorize;
use std::path::Path;

/// Chunk listings longer than this are abbreviated
const MAX_LISTED_CHUNKS: usize = 10;

pub async fn run(config: &Config, sensors: &Path, measurements: &Path, chunk_size: Option<usize>) -> Result<()> {
    let limits = effective_limits(config, chunk_size)?;
    let station = frame::read_files(sensors, measurements)?;

    let first = station.frame.rows().first().map(|r| r.collection_time());
    let last = station.frame.rows().last().map(|r| r.collection_time());
    let rows = station.frame.len();
    let chunks = chunk::plan(station.frame, limits);

    println!("{} Files are valid", "✓".green());
    println!();
    println!("{}", "Sensors:".cyan().bold());
    for sensor in &station.sensors {
        println!("  {:<20} {} ({})", sensor.alias, sensor.variable_name, sensor.units);
    }
    println!();
    println!("{}", "Measurements:".cyan().bold());
    println!("  {:<12} {}", "Rows:", rows);
    if let (Some(first), Some(last)) = (first, last) {
        println!("  {:<12} {} .. {}", "Time range:", first.to_rfc3339(), last.to_rfc3339());
    }
    println!();
    println!(
        "{} (max {} rows, {} per chunk)",
        "Chunks:".cyan().bold(),
        limits.max_rows,
        format_bytes(limits.max_bytes as u64)
    );
    for chunk in chunks.iter().take(MAX_LISTED_CHUNKS) {
        println!(
            "  {:<4} {:<22} {:>6} rows  {:>10}",
            chunk.sequence_index(),
            chunk.file_name(),
            chunk.len(),
            format_bytes(chunk.byte_size_estimate() as u64)
        );
    }
    if chunks.len() > MAX_LISTED_CHUNKS {
        println!("  ... {} more", chunks.len() - MAX_LISTED_CHUNKS);
    }
    println!("  Total: {}", chunks.len());

    Ok(())
}

/// Configured limits, with the row ceiling overridden from the command line
pub(crate) fn effective_limits(config: &Config, chunk_size: Option<usize>) -> Result<ChunkLimits> {
    let limits = config.upload.chunk_limits()?;
    match chunk_size {
        Some(rows) => Ok(ChunkLimits::new(rows, limits.max_bytes)?),
        None => Ok(limits),
    }
}
