//! Upload results
//!
//! Each chunk settles into exactly one [`UploadResult`]. Results are
//! aggregated only after every chunk has settled, sorted by sequence index so
//! the summary is reproducible regardless of completion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Final state of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Accepted on the first attempt
    Succeeded,
    /// Accepted after one or more retries
    Retried,
    /// Permanently rejected or retries exhausted
    Failed,
    /// Never submitted because the run was cancelled
    Cancelled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChunkStatus::Succeeded => "succeeded",
            ChunkStatus::Retried => "retried",
            ChunkStatus::Failed => "failed",
            ChunkStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChunkStatus::Succeeded | ChunkStatus::Retried)
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub sequence_index: usize,
    pub status: ChunkStatus,
    /// Requests actually sent for this chunk (0 when cancelled)
    pub attempt_count: u32,
    /// Measurement rows carried by the chunk
    pub rows: usize,
    /// Sensors the server reported processing, when accepted
    pub sensors_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn succeeded(sequence_index: usize, attempt_count: u32, rows: usize, sensors_processed: usize) -> Self {
        let status = if attempt_count > 1 {
            ChunkStatus::Retried
        } else {
            ChunkStatus::Succeeded
        };
        Self {
            sequence_index,
            status,
            attempt_count,
            rows,
            sensors_processed,
            error: None,
        }
    }

    pub fn failed(sequence_index: usize, attempt_count: u32, rows: usize, error: impl Into<String>) -> Self {
        Self {
            sequence_index,
            status: ChunkStatus::Failed,
            attempt_count,
            rows,
            sensors_processed: 0,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(sequence_index: usize, rows: usize) -> Self {
        Self {
            sequence_index,
            status: ChunkStatus::Cancelled,
            attempt_count: 0,
            rows,
            sensors_processed: 0,
            error: Some("cancelled before submission".to_string()),
        }
    }
}

/// How a run ended, coarsely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// There was nothing to upload
    Empty,
    /// Every chunk succeeded
    Complete,
    /// Some chunks succeeded, some did not
    Partial,
    /// No chunk succeeded
    Failed,
}

/// Aggregated result of an upload run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub sensors_processed: usize,
    /// Rows from chunks that succeeded; rows of failed chunks are never counted
    pub measurements_added: usize,
    pub failed_chunks: BTreeSet<usize>,
    pub cancelled_chunks: BTreeSet<usize>,
    pub total_chunks: usize,
    pub chunk_results: Vec<UploadResult>,
}

impl UploadSummary {
    /// Join-then-aggregate: build the summary once all chunks have settled
    pub fn from_results(mut results: Vec<UploadResult>) -> Self {
        results.sort_by_key(|r| r.sequence_index);

        let mut summary = Self {
            sensors_processed: 0,
            measurements_added: 0,
            failed_chunks: BTreeSet::new(),
            cancelled_chunks: BTreeSet::new(),
            total_chunks: results.len(),
            chunk_results: Vec::new(),
        };

        for result in &results {
            match result.status {
                ChunkStatus::Succeeded | ChunkStatus::Retried => {
                    summary.measurements_added += result.rows;
                    // Every chunk re-sends the full sensor set, so the largest
                    // report is the station's sensor count.
                    summary.sensors_processed = summary.sensors_processed.max(result.sensors_processed);
                },
                ChunkStatus::Failed => {
                    summary.failed_chunks.insert(result.sequence_index);
                },
                ChunkStatus::Cancelled => {
                    summary.cancelled_chunks.insert(result.sequence_index);
                },
            }
        }

        summary.chunk_results = results;
        summary
    }

    pub fn succeeded_chunks(&self) -> usize {
        self.total_chunks - self.failed_chunks.len() - self.cancelled_chunks.len()
    }

    /// Chunks to resubmit: failed and cancelled, ascending
    pub fn unfinished_chunks(&self) -> Vec<usize> {
        self.failed_chunks
            .union(&self.cancelled_chunks)
            .copied()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.cancelled_chunks.is_empty()
    }

    pub fn outcome(&self) -> UploadOutcome {
        if self.total_chunks == 0 {
            UploadOutcome::Empty
        } else if self.is_complete() {
            UploadOutcome::Complete
        } else if self.succeeded_chunks() == 0 {
            UploadOutcome::Failed
        } else {
            UploadOutcome::Partial
        }
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        let mut text = match self.outcome() {
            UploadOutcome::Empty => return "no chunks to upload".to_string(),
            UploadOutcome::Complete => format!("all {} chunks succeeded", self.total_chunks),
            UploadOutcome::Failed => format!("all {} chunks failed", self.total_chunks),
            UploadOutcome::Partial => format!(
                "{} of {} chunks succeeded",
                self.succeeded_chunks(),
                self.total_chunks
            ),
        };

        if !self.failed_chunks.is_empty() {
            text.push_str(&format!("; failed chunks: {:?}", self.failed_chunks));
        }
        if !self.cancelled_chunks.is_empty() {
            text.push_str(&format!("; cancelled chunks: {:?}", self.cancelled_chunks));
        }
        text
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retried_status_from_attempts() {
        assert_eq!(UploadResult::succeeded(0, 1, 10, 2).status, ChunkStatus::Succeeded);
        assert_eq!(UploadResult::succeeded(0, 3, 10, 2).status, ChunkStatus::Retried);
        assert!(ChunkStatus::Retried.is_success());
        assert!(!ChunkStatus::Cancelled.is_success());
    }

    #[test]
    fn test_summary_counts_only_successful_rows() {
        let summary = UploadSummary::from_results(vec![
            UploadResult::failed(2, 4, 100, "HTTP 503"),
            UploadResult::succeeded(0, 1, 100, 2),
            UploadResult::succeeded(1, 2, 100, 2),
            UploadResult::cancelled(3, 40),
        ]);

        assert_eq!(summary.total_chunks, 4);
        assert_eq!(summary.measurements_added, 200);
        assert_eq!(summary.sensors_processed, 2);
        assert_eq!(summary.failed_chunks, BTreeSet::from([2]));
        assert_eq!(summary.cancelled_chunks, BTreeSet::from([3]));
        assert_eq!(summary.unfinished_chunks(), vec![2, 3]);
        assert_eq!(summary.outcome(), UploadOutcome::Partial);

        let order: Vec<usize> = summary.chunk_results.iter().map(|r| r.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_outcomes_are_distinguishable() {
        let empty = UploadSummary::from_results(vec![]);
        assert_eq!(empty.outcome(), UploadOutcome::Empty);
        assert!(empty.is_complete());

        let all_ok = UploadSummary::from_results(vec![UploadResult::succeeded(0, 1, 5, 1)]);
        assert_eq!(all_ok.outcome(), UploadOutcome::Complete);
        assert_eq!(all_ok.describe(), "all 1 chunks succeeded");

        let all_bad = UploadSummary::from_results(vec![
            UploadResult::failed(0, 1, 5, "HTTP 400"),
            UploadResult::failed(1, 1, 5, "HTTP 400"),
        ]);
        assert_eq!(all_bad.outcome(), UploadOutcome::Failed);
        assert_eq!(all_bad.describe(), "all 2 chunks failed; failed chunks: {0, 1}");
    }

    #[test]
    fn test_partial_description() {
        let mut results: Vec<UploadResult> =
            (0..20).map(|i| UploadResult::succeeded(i, 1, 10, 3)).collect();
        for i in [4, 9, 13] {
            results[i] = UploadResult::failed(i, 4, 10, "timeout");
        }
        let summary = UploadSummary::from_results(results);
        assert_eq!(
            summary.describe(),
            "17 of 20 chunks succeeded; failed chunks: {4, 9, 13}"
        );
    }
}
