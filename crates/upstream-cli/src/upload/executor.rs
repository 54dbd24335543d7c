//! Bounded-parallel chunk upload with per-chunk retry
//!
//! Each chunk runs as its own task and produces exactly one [`UploadResult`].
//! Tasks share nothing mutable; results are collected after all of them have
//! settled and only then aggregated into an [`UploadSummary`].

use crate::chunk::Chunk;
use crate::retry::{classify, ChunkEvent, ChunkState, RetryPolicy};
use crate::transport::TransportError;
use crate::upload::sender::ChunkSender;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use upstream_common::types::{UploadResult, UploadSummary};
use upstream_common::{Result, UpstreamError};

/// Default number of chunks in flight at once
pub const DEFAULT_MAX_PARALLEL: usize = 4;

pub struct UploadExecutor {
    policy: RetryPolicy,
    max_parallel: usize,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl UploadExecutor {
    pub fn new(policy: RetryPolicy, max_parallel: usize) -> Self {
        Self {
            policy,
            max_parallel: max_parallel.max(1),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop submitting new chunks once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Advance `progress` by one as each chunk settles
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload every chunk and summarize.
    ///
    /// Returns the summary when all chunks succeeded (or there were none), and
    /// [`UpstreamError::Upload`] carrying the same summary when any chunk failed
    /// or was cancelled.
    pub async fn execute(&self, chunks: Vec<Chunk>, sender: Arc<dyn ChunkSender>) -> Result<UploadSummary> {
        if chunks.is_empty() {
            info!("No chunks to upload");
            return Ok(UploadSummary::from_results(Vec::new()));
        }

        let total = chunks.len();
        let started = Instant::now();
        info!(
            chunks = total,
            max_parallel = self.max_parallel,
            max_retries = self.policy.max_retries,
            "Starting chunked upload"
        );

        let results: Vec<UploadResult> = stream::iter(chunks)
            .map(|chunk| {
                let sender = Arc::clone(&sender);
                async move { self.run_chunk(chunk, sender.as_ref()).await }
            })
            .buffer_unordered(self.max_parallel)
            .inspect(|result| {
                if let Some(progress) = &self.progress {
                    progress.inc(1);
                    progress.set_message(format!("chunk {} {}", result.sequence_index + 1, result.status));
                }
            })
            .collect()
            .await;

        let summary = UploadSummary::from_results(results);
        info!(
            total_chunks = summary.total_chunks,
            measurements_added = summary.measurements_added,
            failed = summary.failed_chunks.len(),
            cancelled = summary.cancelled_chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunked upload finished: {}",
            summary.describe()
        );

        if summary.is_complete() {
            Ok(summary)
        } else {
            Err(UpstreamError::upload(summary))
        }
    }

    async fn run_chunk(&self, chunk: Chunk, sender: &dyn ChunkSender) -> UploadResult {
        let index = chunk.sequence_index();
        let rows = chunk.len();
        let mut state = ChunkState::Pending;

        if self.cancel.is_cancelled() {
            debug!(sequence_index = index, "Skipping chunk after cancellation");
            return UploadResult::cancelled(index, rows);
        }

        loop {
            state = state.transition(ChunkEvent::Submit, &self.policy);
            debug!(
                sequence_index = index,
                attempt = state.attempts(),
                rows,
                bytes = chunk.byte_size_estimate(),
                "Sending chunk"
            );

            let outcome = match tokio::time::timeout(self.policy.request_timeout, sender.send(&chunk)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout),
            };

            let err = match outcome {
                Ok(ack) => {
                    state = state.transition(ChunkEvent::Accepted, &self.policy);
                    info!(
                        sequence_index = index,
                        attempts = state.attempts(),
                        rows,
                        server_measurements = ack.measurements_added,
                        "Chunk uploaded"
                    );
                    return UploadResult::succeeded(index, state.attempts(), rows, ack.sensors_processed);
                },
                Err(err) => err,
            };

            state = state.transition(ChunkEvent::Rejected(classify(&err)), &self.policy);
            match state {
                ChunkState::Retrying { attempt, delay } => {
                    warn!(
                        sequence_index = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Chunk upload failed, retrying"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            state = state.transition(ChunkEvent::Cancel, &self.policy);
                            warn!(sequence_index = index, "Retry abandoned after cancellation");
                            return UploadResult::failed(
                                index,
                                state.attempts(),
                                rows,
                                format!("cancelled while waiting to retry; last error: {}", err),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                },
                _ => {
                    error!(
                        sequence_index = index,
                        attempts = state.attempts(),
                        status = err.status(),
                        error = %err,
                        "Chunk upload failed permanently"
                    );
                    return UploadResult::failed(index, state.attempts(), rows, err.to_string());
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chunk::{plan, ChunkLimits};
    use crate::upload::sender::ChunkAck;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use upstream_common::types::{ChunkStatus, MeasurementFrame, MeasurementRow};

    type Script = dyn Fn(usize, u32) -> std::result::Result<ChunkAck, TransportError> + Send + Sync;

    /// Answers from a script of (sequence index, attempt) and records calls
    struct ScriptedSender {
        script: Box<Script>,
        attempts: Mutex<HashMap<usize, u32>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(script: impl Fn(usize, u32) -> std::result::Result<ChunkAck, TransportError> + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                attempts: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self, index: usize) -> u32 {
            self.attempts.lock().unwrap().get(&index).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.attempts.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl ChunkSender for ScriptedSender {
        async fn send(&self, chunk: &Chunk) -> std::result::Result<ChunkAck, TransportError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(chunk.sequence_index()).or_insert(0);
                *entry += 1;
                *entry
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            (self.script)(chunk.sequence_index(), attempt)
        }
    }

    fn ok() -> std::result::Result<ChunkAck, TransportError> {
        Ok(ChunkAck {
            sensors_processed: 2,
            measurements_added: 0,
        })
    }

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            retry_after: None,
            body: String::new(),
        }
    }

    fn chunks(rows: usize, per_chunk: usize) -> Vec<Chunk> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = (0..rows)
            .map(|i| {
                MeasurementRow::new(
                    start + ChronoDuration::minutes(i as i64),
                    30.0,
                    -97.0,
                    vec![Some(i as f64), None],
                )
                .unwrap()
            })
            .collect();
        let frame = MeasurementFrame::new(vec!["temp".into(), "rh".into()], rows).unwrap();
        plan(frame, ChunkLimits::new(per_chunk, 1 << 20).unwrap())
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_all_chunks_succeed() {
        let sender = Arc::new(ScriptedSender::new(|_, _| ok()));
        let executor = UploadExecutor::new(policy(3), 4);

        let summary = executor.execute(chunks(3, 2), sender.clone()).await.unwrap();

        assert_eq!(summary.total_chunks, 2);
        assert_eq!(summary.measurements_added, 3);
        assert_eq!(summary.sensors_processed, 2);
        assert!(summary.failed_chunks.is_empty());
        assert!(summary
            .chunk_results
            .iter()
            .all(|r| r.status == ChunkStatus::Succeeded && r.attempt_count == 1));
    }

    #[tokio::test]
    async fn test_no_chunks_is_trivial_success() {
        let sender = Arc::new(ScriptedSender::new(|_, _| ok()));
        let summary = UploadExecutor::new(policy(3), 4)
            .execute(Vec::new(), sender.clone())
            .await
            .unwrap();
        assert_eq!(summary.total_chunks, 0);
        assert_eq!(sender.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_transient_failure_marks_one_chunk() {
        let sender = Arc::new(ScriptedSender::new(|index, _| if index == 2 { Err(status(503)) } else { ok() }));
        let executor = UploadExecutor::new(policy(3), 2);

        let err = executor.execute(chunks(10, 2), sender.clone()).await.unwrap_err();
        let summary = err.upload_summary().unwrap();

        assert_eq!(summary.failed_chunks, BTreeSet::from([2]));
        assert_eq!(summary.measurements_added, 8);
        assert_eq!(sender.calls(2), 4);
        assert_eq!(summary.chunk_results[2].attempt_count, 4);
        assert!(summary.chunk_results[2].error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let sender = Arc::new(ScriptedSender::new(|index, _| if index == 0 { Err(status(400)) } else { ok() }));
        let err = UploadExecutor::new(policy(3), 1)
            .execute(chunks(4, 2), sender.clone())
            .await
            .unwrap_err();

        assert_eq!(sender.calls(0), 1);
        let summary = err.upload_summary().unwrap();
        assert_eq!(summary.failed_chunks, BTreeSet::from([0]));
        assert_eq!(summary.measurements_added, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_chunk_is_marked_retried() {
        let sender = Arc::new(ScriptedSender::new(|index, attempt| {
            if index == 1 && attempt < 3 {
                Err(TransportError::Connect("connection reset".into()))
            } else {
                ok()
            }
        }));

        let summary = UploadExecutor::new(policy(3), 4)
            .execute(chunks(6, 2), sender.clone())
            .await
            .unwrap();

        assert_eq!(summary.chunk_results[1].status, ChunkStatus::Retried);
        assert_eq!(summary.chunk_results[1].attempt_count, 3);
        assert_eq!(summary.measurements_added, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let sender = Arc::new(ScriptedSender::new(|_, attempt| {
            if attempt == 1 {
                Err(TransportError::Status {
                    status: 429,
                    retry_after: Some(Duration::from_secs(20)),
                    body: "slow down".into(),
                })
            } else {
                ok()
            }
        }));

        let started = tokio::time::Instant::now();
        let summary = UploadExecutor::new(policy(3), 1)
            .execute(chunks(1, 1), sender.clone())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(summary.chunk_results[0].status, ChunkStatus::Retried);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let sender = Arc::new(ScriptedSender::new(|_, _| ok()).with_delay(Duration::from_secs(60)));
        let err = UploadExecutor::new(policy(1), 1)
            .execute(chunks(1, 1), sender.clone())
            .await
            .unwrap_err();

        assert_eq!(sender.calls(0), 2);
        let result = &err.upload_summary().unwrap().chunk_results[0];
        assert_eq!(result.status, ChunkStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let sender = Arc::new(ScriptedSender::new(|_, _| ok()).with_delay(Duration::from_millis(50)));
        UploadExecutor::new(policy(0), 3)
            .execute(chunks(20, 1), sender.clone())
            .await
            .unwrap();

        let peak = sender.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak > 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_submits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sender = Arc::new(ScriptedSender::new(|_, _| ok()));

        let err = UploadExecutor::new(policy(3), 2)
            .with_cancellation(cancel)
            .execute(chunks(5, 2), sender.clone())
            .await
            .unwrap_err();

        assert_eq!(sender.total_calls(), 0);
        let summary = err.upload_summary().unwrap();
        assert_eq!(summary.cancelled_chunks, BTreeSet::from([0, 1, 2]));
        assert_eq!(summary.measurements_added, 0);
        assert!(summary.chunk_results.iter().all(|r| r.attempt_count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_run_lets_in_flight_finish() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sender = Arc::new(
            ScriptedSender::new(move |index, _| {
                if index == 0 {
                    trigger.cancel();
                }
                ok()
            })
            .with_delay(Duration::from_millis(10)),
        );

        let err = UploadExecutor::new(policy(0), 2)
            .with_cancellation(cancel)
            .execute(chunks(5, 1), sender.clone())
            .await
            .unwrap_err();

        let summary = err.upload_summary().unwrap();
        // Chunks 0 and 1 were already in flight when the signal fired
        assert_eq!(summary.chunk_results[0].status, ChunkStatus::Succeeded);
        assert_eq!(summary.chunk_results[1].status, ChunkStatus::Succeeded);
        assert_eq!(summary.cancelled_chunks, BTreeSet::from([2, 3, 4]));
        assert_eq!(summary.measurements_added, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_set_is_deterministic() {
        for _ in 0..3 {
            let sender = Arc::new(
                ScriptedSender::new(|index, _| if index % 3 == 0 { Err(status(500)) } else { ok() })
                    .with_delay(Duration::from_millis(5)),
            );
            let err = UploadExecutor::new(policy(1), 4)
                .execute(chunks(12, 1), sender)
                .await
                .unwrap_err();
            assert_eq!(
                err.upload_summary().unwrap().failed_chunks,
                BTreeSet::from([0, 3, 6, 9])
            );
        }
    }
}
