//! Bounded-time polling
//!
//! Used by the acquisition stage to wait for the download client to report a
//! finished torrent. The waiter re-evaluates a status source every `period`
//! until a predicate holds or `timeout` elapses; it never returns partial
//! results and a `false` result is final for that attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `poll` every `period` until `is_done` holds
///
/// The first poll happens immediately, even with a zero `timeout`. Returns
/// `true` the first time `is_done` accepts a status, `false` once `timeout`
/// has elapsed without that happening.
pub async fn wait_for<P, Fut, S, D>(
    mut poll: P,
    is_done: D,
    period: Duration,
    timeout: Duration,
) -> bool
where
    P: FnMut() -> Fut,
    Fut: Future<Output = S>,
    D: Fn(&S) -> bool,
{
    let deadline = Instant::now() + timeout;

    loop {
        let status = poll().await;
        if is_done(&status) {
            return true;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(period.min(remaining)).await;
    }

    tracing::debug!(timeout_secs = timeout.as_secs(), "Polling timed out");
    false
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn returns_true_as_soon_as_done_without_waiting_for_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let start = Instant::now();

        let done = wait_for(
            || {
                let calls = calls_clone.clone();
                async move { calls.fetch_add(1, Ordering::SeqCst) + 1 }
            },
            |count| *count >= 3,
            Duration::from_secs(3),
            Duration::from_secs(86_400),
        )
        .await;

        assert!(done);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_false_once_timeout_elapses() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let start = Instant::now();

        let done = wait_for(
            || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    0.5_f64
                }
            },
            |progress| *progress >= 1.0,
            Duration::from_secs(3),
            Duration::from_secs(10),
        )
        .await;

        assert!(!done);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        // Polled at 0, 3, 6 and 9 seconds, then once more at the deadline
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_still_polls_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let done = wait_for(
            || {
                let calls = calls_clone.clone();
                async move { calls.fetch_add(1, Ordering::SeqCst) + 1 }
            },
            |count| *count >= 2,
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .await;

        assert!(!done);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_accepts_an_already_finished_status() {
        let start = Instant::now();
        let done = wait_for(
            || async { 1.0_f64 },
            |progress| *progress >= 1.0,
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .await;

        assert!(done);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
