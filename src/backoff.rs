//! Truncated exponential backoff for retryable operations.
//!
//! Two policies exist: [`TransferBackoff`] classifies data-transfer errors
//! and refuses to retry anything it does not recognize, while
//! [`ControlPlaneBackoff`] treats every error as transient. Both double
//! their delay per retry and cap it at a fixed maximum.

use crate::error::{QuiesceError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const INGEST_RETRY_TIMES: usize = 16;
const INGEST_WAIT_INTERVAL: Duration = Duration::from_millis(10);
const INGEST_MAX_WAIT_INTERVAL: Duration = Duration::from_secs(1);

const DOWNLOAD_RETRY_TIMES: usize = 8;
const DOWNLOAD_WAIT_INTERVAL: Duration = Duration::from_millis(10);
const DOWNLOAD_MAX_WAIT_INTERVAL: Duration = Duration::from_secs(1);

const CONTROL_PLANE_RETRY_TIMES: usize = 16;
const CONTROL_PLANE_WAIT_INTERVAL: Duration = Duration::from_millis(50);
const CONTROL_PLANE_MAX_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// A backoff policy regulating a retry loop.
pub trait Backoff {
    /// Decide how long to wait before the next attempt, given the error
    /// from the last one. Updates the internal attempt budget.
    fn next_delay(&mut self, err: &QuiesceError) -> Duration;

    /// Attempts left; callers stop retrying once this reaches zero.
    fn attempts_remaining(&self) -> usize;
}

/// Backoff for bulk data-transfer operations (ingestion and download).
///
/// Retries only errors it recognizes as transient; expected-terminal
/// errors and anything unexpected zero the budget so the loop stops.
#[derive(Debug)]
pub struct TransferBackoff {
    attempts: usize,
    delay: Duration,
    max_delay: Duration,
}

impl TransferBackoff {
    pub fn new(attempts: usize, delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            max_delay,
        }
    }

    /// Policy for SST ingestion retries.
    pub fn ingest() -> Self {
        Self::new(
            INGEST_RETRY_TIMES,
            INGEST_WAIT_INTERVAL,
            INGEST_MAX_WAIT_INTERVAL,
        )
    }

    /// Policy for SST download retries.
    pub fn download() -> Self {
        Self::new(
            DOWNLOAD_RETRY_TIMES,
            DOWNLOAD_WAIT_INTERVAL,
            DOWNLOAD_MAX_WAIT_INTERVAL,
        )
    }
}

impl Backoff for TransferBackoff {
    fn next_delay(&mut self, err: &QuiesceError) -> Duration {
        if err.is_retryable_transient() {
            self.delay *= 2;
            self.attempts = self.attempts.saturating_sub(1);
        } else if err.is_expected_terminal() {
            // Expected error, finish the operation.
            self.delay = Duration::ZERO;
            self.attempts = 0;
        } else {
            self.delay = Duration::ZERO;
            self.attempts = 0;
            warn!(error = %err, "unexpected error, stop retrying");
        }
        self.delay.min(self.max_delay)
    }

    fn attempts_remaining(&self) -> usize {
        self.attempts
    }
}

/// Backoff for control-plane requests. Every error is treated as
/// transient; there is nothing to classify on this path.
#[derive(Debug)]
pub struct ControlPlaneBackoff {
    attempts: usize,
    delay: Duration,
    max_delay: Duration,
}

impl ControlPlaneBackoff {
    /// Policy for control-plane calls such as TS resets.
    pub fn control_plane() -> Self {
        Self {
            attempts: CONTROL_PLANE_RETRY_TIMES,
            delay: CONTROL_PLANE_WAIT_INTERVAL,
            max_delay: CONTROL_PLANE_MAX_WAIT_INTERVAL,
        }
    }
}

impl Backoff for ControlPlaneBackoff {
    fn next_delay(&mut self, _err: &QuiesceError) -> Duration {
        self.delay *= 2;
        self.attempts = self.attempts.saturating_sub(1);
        self.delay.min(self.max_delay)
    }

    fn attempts_remaining(&self) -> usize {
        self.attempts
    }
}

/// Drive an async operation through a backoff policy, sleeping between
/// attempts. Returns the last error once the attempt budget is exhausted.
pub async fn with_retry<T, F, Fut>(backoff: &mut dyn Backoff, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let delay = backoff.next_delay(&err);
                if backoff.attempts_remaining() == 0 {
                    return Err(err);
                }
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_transient_error_doubles_delay_until_capped() {
        let mut bo = TransferBackoff::new(16, Duration::from_millis(10), Duration::from_secs(1));
        let err = QuiesceError::IngestFailed("peer busy".into());

        let mut last = Duration::ZERO;
        for _ in 0..6 {
            let delay = bo.next_delay(&err);
            assert!(delay > last, "delay must strictly increase before the cap");
            assert!(delay <= Duration::from_secs(1));
            last = delay;
        }
        // 10ms doubled 7+ times exceeds the cap.
        for _ in 0..4 {
            assert_eq!(bo.next_delay(&err), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_transient_error_decrements_attempts_by_one() {
        let mut bo = TransferBackoff::ingest();
        assert_eq!(bo.attempts_remaining(), 16);
        bo.next_delay(&QuiesceError::EpochMismatch("stale".into()));
        assert_eq!(bo.attempts_remaining(), 15);
        bo.next_delay(&QuiesceError::Unavailable("node down".into()));
        assert_eq!(bo.attempts_remaining(), 14);
        bo.next_delay(&QuiesceError::Aborted("conflict".into()));
        assert_eq!(bo.attempts_remaining(), 13);
    }

    #[test]
    fn test_expected_terminal_error_stops_immediately() {
        let mut bo = TransferBackoff::download();
        assert_eq!(bo.next_delay(&QuiesceError::RangeIsEmpty), Duration::ZERO);
        assert_eq!(bo.attempts_remaining(), 0);

        let mut bo = TransferBackoff::download();
        let err = QuiesceError::RewriteRuleNotFound("t1".into());
        assert_eq!(bo.next_delay(&err), Duration::ZERO);
        assert_eq!(bo.attempts_remaining(), 0);
    }

    #[test]
    fn test_unexpected_error_stops_immediately() {
        let mut bo = TransferBackoff::ingest();
        let err = QuiesceError::Internal("wat".into());
        assert_eq!(bo.next_delay(&err), Duration::ZERO);
        assert_eq!(bo.attempts_remaining(), 0);
    }

    #[test]
    fn test_control_plane_backoff_retries_everything() {
        let mut bo = ControlPlaneBackoff::control_plane();
        assert_eq!(bo.attempts_remaining(), 16);

        // Even an unexpected error keeps the retry budget draining one
        // attempt at a time.
        let err = QuiesceError::Internal("wat".into());
        assert_eq!(bo.next_delay(&err), Duration::from_millis(100));
        assert_eq!(bo.next_delay(&err), Duration::from_millis(200));
        assert_eq!(bo.next_delay(&err), Duration::from_millis(400));
        assert_eq!(bo.next_delay(&err), Duration::from_millis(500));
        assert_eq!(bo.next_delay(&err), Duration::from_millis(500));
        assert_eq!(bo.attempts_remaining(), 11);
    }

    #[tokio::test]
    async fn test_with_retry_eventual_success() {
        let mut bo = TransferBackoff::new(5, Duration::from_millis(1), Duration::from_millis(4));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = with_retry(&mut bo, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                    Err(QuiesceError::DownloadFailed("flaky".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_terminal_error() {
        let mut bo = TransferBackoff::ingest();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&mut bo, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(QuiesceError::RangeIsEmpty)
            }
        })
        .await;

        assert!(matches!(result, Err(QuiesceError::RangeIsEmpty)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let mut bo = TransferBackoff::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = with_retry(&mut bo, || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(QuiesceError::IngestFailed("still busy".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(QuiesceError::IngestFailed(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
