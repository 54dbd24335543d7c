//! `upstream upload` command implementation
//!
//! Reads a station's files, plans chunks, and uploads them to the platform.

use crate::api::PlatformSession;
use crate::chunk;
use crate::commands::validate::effective_limits;
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::frame;
use crate::progress::create_chunk_progress;
use crate::upload::{HttpChunkSender, UploadExecutor};
use crate::UploadArgs;
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use upstream_common::types::{UploadOutcome, UploadSummary};

/// Which station to upload to, and from which files
#[derive(Debug, Clone, Copy)]
pub struct StationFiles<'a> {
    pub campaign_id: &'a str,
    pub station_id: &'a str,
    pub sensors: &'a Path,
    pub measurements: &'a Path,
}

pub async fn run(
    config: &Config,
    files: StationFiles<'_>,
    args: &UploadArgs,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let result = upload_station(config, files, args, cancel, !json).await;

    let summary = match &result {
        Ok(summary) => Some(summary),
        Err(err) => err.upload_summary(),
    };
    if let Some(summary) = summary {
        if json {
            println!("{}", serde_json::to_string_pretty(summary)?);
        } else {
            print_summary(summary);
        }
    }

    result.map(|_| ())
}

/// Upload one station's measurements, returning the summary.
///
/// An incomplete upload is an error carrying the summary.
pub async fn upload_station(
    config: &Config,
    files: StationFiles<'_>,
    args: &UploadArgs,
    cancel: CancellationToken,
    show_progress: bool,
) -> Result<UploadSummary> {
    let (base_url, token) = config.require_platform()?;
    let limits = effective_limits(config, args.chunk_size)?;
    let max_parallel = args.max_parallel.unwrap_or(config.upload.max_parallel);
    if max_parallel == 0 {
        return Err(CliError::config("--max-parallel must be greater than zero"));
    }

    let station = frame::read_files(files.sensors, files.measurements)?;
    let sensors_csv = std::fs::read(files.sensors)?;

    let mut chunks = chunk::plan(station.frame, limits);
    if !args.only_chunks.is_empty() {
        let selected: BTreeSet<usize> = args.only_chunks.iter().copied().collect();
        chunks = chunk::select(chunks, &selected)?;
        info!(chunks = ?selected, "Resubmitting selected chunks");
    }

    let policy = config.upload.retry_policy();
    let session = PlatformSession::new(base_url, token, policy.request_timeout)?;
    let sender = HttpChunkSender::new(session, files.campaign_id, files.station_id, sensors_csv);
    info!(
        url = sender.url(),
        chunks = chunks.len(),
        sensors = station.sensors.len(),
        "Uploading station measurements"
    );

    let progress = create_chunk_progress(chunks.len() as u64, "Uploading measurements", show_progress);
    let executor = UploadExecutor::new(policy, max_parallel)
        .with_cancellation(cancel)
        .with_progress(progress.clone());

    let result = executor.execute(chunks, Arc::new(sender)).await;
    progress.finish_and_clear();

    Ok(result?)
}

/// Human-readable upload report
pub fn print_summary(summary: &UploadSummary) {
    let headline = match summary.outcome() {
        UploadOutcome::Empty | UploadOutcome::Complete => format!("✓ {}", summary.describe()).as_str().green(),
        UploadOutcome::Partial => format!("⚠ {}", summary.describe()).as_str().yellow(),
        UploadOutcome::Failed => format!("✗ {}", summary.describe()).as_str().red(),
    };
    println!("{}", headline.bold());
    println!();
    println!("  {:<20} {}", "Sensors processed:", summary.sensors_processed);
    println!("  {:<20} {}", "Measurements added:", summary.measurements_added);
    println!(
        "  {:<20} {}/{}",
        "Chunks succeeded:",
        summary.succeeded_chunks(),
        summary.total_chunks
    );

    for result in summary.chunk_results.iter().filter(|r| !r.status.is_success()) {
        println!(
            "  chunk {:<4} {:<10} attempts={} {}",
            result.sequence_index,
            result.status.as_str(),
            result.attempt_count,
            result.error.as_deref().unwrap_or("")
        );
    }

    if let Some(hint) = resubmit_hint(summary) {
        println!();
        println!("{}", "To resend only the unfinished chunks:".cyan());
        println!("  {}", hint);
    }
}

/// `--only-chunks` argument that resends exactly the unfinished chunks
fn resubmit_hint(summary: &UploadSummary) -> Option<String> {
    let unfinished = summary.unfinished_chunks();
    if unfinished.is_empty() {
        return None;
    }
    let list: Vec<String> = unfinished.iter().map(|i| i.to_string()).collect();
    Some(format!("--only-chunks {}", list.join(",")))
}
