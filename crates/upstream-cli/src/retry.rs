//! Retry classification and backoff
//!
//! [`classify`] is the single transient-versus-fatal decision for every
//! remote call. [`ChunkState`] encodes the per-request lifecycle
//! `Pending -> InFlight -> (Succeeded | Retrying -> InFlight | Failed)` so the
//! retry ceiling lives in one transition function.

use crate::transport::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Whether a failure may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, connection failure, 5xx, or 429
    Transient { retry_after: Option<Duration> },
    /// Anything the same request will keep failing with
    Fatal,
}

/// Decide whether a failed request is worth repeating
pub fn classify(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Timeout | TransportError::Connect(_) => {
            FailureClass::Transient { retry_after: None }
        },
        TransportError::Status {
            status,
            retry_after,
            ..
        } if *status == 429 || (500..=599).contains(status) => FailureClass::Transient {
            retry_after: *retry_after,
        },
        TransportError::Status { .. } | TransportError::Decode(_) | TransportError::Other(_) => {
            FailureClass::Fatal
        },
    }
}

/// Retry ceiling, backoff curve, and per-request timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    ///
    /// Exponential in `retry`, capped at `max_delay`, with the upper half
    /// randomized. A server `Retry-After` is a lower bound.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let ceiling = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let half = ceiling / 2;
        let jitter_ms = (ceiling - half).as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let backoff = half + jitter;

        match retry_after {
            Some(server) => server.max(backoff),
            None => backoff,
        }
    }
}

/// Lifecycle of one request that may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
    Cancelled,
}

/// Inputs that move a [`ChunkState`] forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEvent {
    Submit,
    Accepted,
    Rejected(FailureClass),
    Cancel,
}

impl ChunkState {
    /// Apply an event. Events that do not apply to the current state leave it unchanged.
    pub fn transition(self, event: ChunkEvent, policy: &RetryPolicy) -> ChunkState {
        use ChunkState::*;

        match (self, event) {
            (Pending, ChunkEvent::Submit) => InFlight { attempt: 1 },
            (Pending, ChunkEvent::Cancel) => Cancelled,
            (Retrying { attempt, .. }, ChunkEvent::Submit) => InFlight {
                attempt: attempt + 1,
            },
            (Retrying { attempt, .. }, ChunkEvent::Cancel) => Failed { attempts: attempt },
            (InFlight { attempt }, ChunkEvent::Accepted) => Succeeded { attempts: attempt },
            (InFlight { attempt }, ChunkEvent::Rejected(FailureClass::Transient { retry_after }))
                if attempt <= policy.max_retries =>
            {
                Retrying {
                    attempt,
                    delay: policy.delay_for(attempt, retry_after),
                }
            },
            (InFlight { attempt }, ChunkEvent::Rejected(_)) => Failed { attempts: attempt },
            (state, _) => state,
        }
    }

    /// Requests sent so far
    pub fn attempts(&self) -> u32 {
        match self {
            ChunkState::Pending | ChunkState::Cancelled => 0,
            ChunkState::InFlight { attempt } | ChunkState::Retrying { attempt, .. } => *attempt,
            ChunkState::Succeeded { attempts } | ChunkState::Failed { attempts } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChunkState::Succeeded { .. } | ChunkState::Failed { .. } | ChunkState::Cancelled
        )
    }
}

/// Run `operation` under `policy`, retrying transient failures.
///
/// Each attempt is bounded by `policy.request_timeout`; an expired attempt
/// counts as [`TransportError::Timeout`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    retry_with_recovery(policy, label, operation, || std::future::ready(Ok(None))).await
}

/// Whether the server may have applied a request that reported failure.
///
/// Connection failures and 429 never reached a handler; a timeout or 5xx may
/// have been committed before the response was lost.
pub fn may_have_committed(err: &TransportError) -> bool {
    match err {
        TransportError::Timeout => true,
        TransportError::Status { status, .. } => (500..=599).contains(status),
        _ => false,
    }
}

/// [`retry_with_backoff`] for requests that create something.
///
/// Before resending after a failure that [`may_have_committed`], `lookup`
/// asks the server for the committed result. `Some` ends the retry loop with
/// that value. When the lookup itself fails, the original error is returned
/// rather than risking a duplicate.
pub async fn retry_with_recovery<T, F, Fut, L, LFut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
    mut lookup: L,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    L: FnMut() -> LFut,
    LFut: Future<Output = Result<Option<T>, TransportError>>,
{
    let mut state = ChunkState::Pending;

    loop {
        state = state.transition(ChunkEvent::Submit, policy);

        let outcome = match tokio::time::timeout(policy.request_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        state = state.transition(ChunkEvent::Rejected(classify(&err)), policy);
        match state {
            ChunkState::Retrying { attempt, delay } => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;

                if may_have_committed(&err) {
                    let found = match tokio::time::timeout(policy.request_timeout, lookup()).await {
                        Ok(found) => found,
                        Err(_) => Err(TransportError::Timeout),
                    };
                    match found {
                        Ok(Some(value)) => {
                            tracing::info!(operation = label, "Earlier attempt was applied; not resending");
                            return Ok(value);
                        },
                        Ok(None) => {},
                        Err(lookup_err) => {
                            tracing::warn!(
                                operation = label,
                                error = %lookup_err,
                                "Could not confirm whether the failed request was applied"
                            );
                            return Err(err);
                        },
                    }
                }
            },
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            retry_after: None,
            body: String::new(),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(&TransportError::Timeout), FailureClass::Transient { .. }));
        assert!(matches!(
            classify(&TransportError::Connect("reset".into())),
            FailureClass::Transient { .. }
        ));
        assert!(matches!(classify(&status(500)), FailureClass::Transient { .. }));
        assert!(matches!(classify(&status(503)), FailureClass::Transient { .. }));
        assert_eq!(classify(&status(400)), FailureClass::Fatal);
        assert_eq!(classify(&status(401)), FailureClass::Fatal);
        assert_eq!(classify(&status(404)), FailureClass::Fatal);
        assert_eq!(classify(&TransportError::Decode("eof".into())), FailureClass::Fatal);

        let limited = TransportError::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
            body: String::new(),
        };
        assert_eq!(
            classify(&limited),
            FailureClass::Transient {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let p = policy(10);
        for _ in 0..50 {
            let first = p.delay_for(1, None);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

            let third = p.delay_for(3, None);
            assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));

            let late = p.delay_for(30, None);
            assert!(late >= Duration::from_secs(1) && late <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_retry_after_is_lower_bound() {
        let p = policy(3);
        assert!(p.delay_for(1, Some(Duration::from_secs(10))) >= Duration::from_secs(10));
    }

    #[test]
    fn test_state_machine_retry_ceiling() {
        let p = policy(2);
        let transient = ChunkEvent::Rejected(FailureClass::Transient { retry_after: None });

        let s = ChunkState::Pending.transition(ChunkEvent::Submit, &p);
        assert_eq!(s, ChunkState::InFlight { attempt: 1 });

        let s = s.transition(transient, &p);
        assert!(matches!(s, ChunkState::Retrying { attempt: 1, .. }));
        let s = s.transition(ChunkEvent::Submit, &p).transition(transient, &p);
        assert!(matches!(s, ChunkState::Retrying { attempt: 2, .. }));
        let s = s.transition(ChunkEvent::Submit, &p).transition(transient, &p);
        assert_eq!(s, ChunkState::Failed { attempts: 3 });
        assert!(s.is_terminal());
    }

    #[test]
    fn test_state_machine_fatal_and_cancel() {
        let p = policy(5);
        let s = ChunkState::Pending
            .transition(ChunkEvent::Submit, &p)
            .transition(ChunkEvent::Rejected(FailureClass::Fatal), &p);
        assert_eq!(s, ChunkState::Failed { attempts: 1 });

        assert_eq!(
            ChunkState::Pending.transition(ChunkEvent::Cancel, &p),
            ChunkState::Cancelled
        );
        let retrying = ChunkState::Retrying {
            attempt: 2,
            delay: Duration::from_secs(1),
        };
        assert_eq!(
            retrying.transition(ChunkEvent::Cancel, &p),
            ChunkState::Failed { attempts: 2 }
        );
        // In-flight requests are never cancelled
        let in_flight = ChunkState::InFlight { attempt: 1 };
        assert_eq!(in_flight.transition(ChunkEvent::Cancel, &p), in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_recovers() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(status(502))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_stops_on_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status(422)) }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(422));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_times_out() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), TransportError::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_may_have_committed() {
        assert!(may_have_committed(&TransportError::Timeout));
        assert!(may_have_committed(&status(503)));
        assert!(!may_have_committed(&status(429)));
        assert!(!may_have_committed(&status(409)));
        assert!(!may_have_committed(&TransportError::Connect("refused".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_recovery_returns_committed_result() {
        let sends = AtomicU32::new(0);
        let lookups = AtomicU32::new(0);
        let result = retry_with_recovery(
            &policy(3),
            "create",
            || {
                sends.fetch_add(1, Ordering::SeqCst);
                async { Err(status(504)) }
            },
            || {
                lookups.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some("created")) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "created");
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_recovery_resends_when_nothing_was_applied() {
        let sends = AtomicU32::new(0);
        let result = retry_with_recovery(
            &policy(3),
            "create",
            || {
                let n = sends.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TransportError::Timeout)
                    } else {
                        Ok("created")
                    }
                }
            },
            || async { Ok(None) },
        )
        .await;

        assert_eq!(result.unwrap(), "created");
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_recovery_skips_lookup_for_rate_limit() {
        let lookups = AtomicU32::new(0);
        let sends = AtomicU32::new(0);
        let result = retry_with_recovery(
            &policy(3),
            "create",
            || {
                let n = sends.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(status(429))
                    } else {
                        Ok(n)
                    }
                }
            },
            || {
                lookups.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_recovery_gives_up_when_lookup_fails() {
        let sends = AtomicU32::new(0);
        let result: Result<&str, _> = retry_with_recovery(
            &policy(3),
            "create",
            || {
                sends.fetch_add(1, Ordering::SeqCst);
                async { Err(status(500)) }
            },
            || async { Err(TransportError::Connect("refused".into())) },
        )
        .await;

        assert_eq!(result.unwrap_err().status(), Some(500));
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }
}
