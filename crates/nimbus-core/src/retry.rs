//! Bounded-loop retry with exponential backoff
//!
//! Every transfer attempt in the engine goes through [`with_retry`]: an
//! explicit loop with an attempt counter (never recursion), a capped
//! exponential delay, and retry only for failures classified transient by
//! [`is_retryable_error`].
//!
//! Two caps exist: transfers back off to at most 30 seconds, the generic
//! recovery path (engine-level restart attempts) to at most 60.

use std::{future::Future, time::Duration};

use tracing::{debug, warn};

use crate::domain::SyncError;

/// Base delay for the first retry
pub const BASE_DELAY_SECS: u64 = 1;

/// Backoff ceiling for per-transfer retries
pub const TRANSFER_BACKOFF_CAP_SECS: u64 = 30;

/// Backoff ceiling for engine-level recovery retries
pub const RECOVERY_BACKOFF_CAP_SECS: u64 = 60;

/// Delay before attempt `attempt` (1-based): `min(cap, 1s × 2^(attempt-1))`
///
/// Attempt 1 waits 1s, attempt 2 waits 2s, then 4, 8, 16, and the cap from
/// there on.
pub fn backoff_delay(attempt: u32, cap_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1);
    let secs = BASE_DELAY_SECS
        .checked_shl(exp)
        .unwrap_or(u64::MAX)
        .min(cap_secs);
    Duration::from_secs(secs)
}

/// Classifies a failure as worth retrying
///
/// Downcasts to [`SyncError`] when the adapter preserved one as the root
/// cause; otherwise falls back to matching the rendered error text for
/// known transient markers (connection resets, 429/5xx fragments).
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    if let Some(sync_err) = err.downcast_ref::<SyncError>() {
        return sync_err.is_retryable();
    }
    let text = format!("{err:#}").to_lowercase();
    text.contains("timed out")
        || text.contains("timeout")
        || text.contains("connection refused")
        || text.contains("connection reset")
        || text.contains("network unreachable")
        || text.contains("temporarily unavailable")
        || text.contains("429")
        || text.contains("502")
        || text.contains("503")
        || text.contains("504")
}

/// Runs `operation` up to `max_attempts` times with capped exponential
/// backoff between attempts
///
/// Returns the first success, or the last error once attempts are
/// exhausted or a non-retryable failure is seen.
///
/// # Arguments
/// * `operation_name` - Label for log lines
/// * `max_attempts` - Total attempts, including the first
/// * `cap_secs` - Backoff ceiling ([`TRANSFER_BACKOFF_CAP_SECS`] or
///   [`RECOVERY_BACKOFF_CAP_SECS`])
/// * `operation` - Closure producing the future to attempt
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    max_attempts: u32,
    cap_secs: u64,
    mut operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable_error(&err) {
                    debug!(
                        operation = operation_name,
                        error = %err,
                        "Non-retryable failure, giving up"
                    );
                    return Err(err);
                }
                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }
                let delay = backoff_delay(attempt, cap_secs);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_backoff_schedule_transfer_cap() {
        let delays: Vec<u64> = (1..=7)
            .map(|n| backoff_delay(n, TRANSFER_BACKOFF_CAP_SECS).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_backoff_schedule_recovery_cap() {
        let delays: Vec<u64> = (1..=8)
            .map(|n| backoff_delay(n, RECOVERY_BACKOFF_CAP_SECS).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_backoff_never_overflows() {
        assert_eq!(
            backoff_delay(200, TRANSFER_BACKOFF_CAP_SECS).as_secs(),
            TRANSFER_BACKOFF_CAP_SECS
        );
    }

    #[test]
    fn test_classification_from_sync_error() {
        let retryable = anyhow::Error::new(SyncError::ServerError(503));
        assert!(is_retryable_error(&retryable));
        let permanent = anyhow::Error::new(SyncError::PermissionDenied("x".into()));
        assert!(!is_retryable_error(&permanent));
    }

    #[test]
    fn test_classification_from_text_fallback() {
        assert!(is_retryable_error(&anyhow::anyhow!(
            "request failed: connection reset by peer"
        )));
        assert!(!is_retryable_error(&anyhow::anyhow!("file is corrupt")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = with_retry("upload", 3, TRANSFER_BACKOFF_CAP_SECS, move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::Error::new(SyncError::ServerError(503)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: anyhow::Result<()> =
            with_retry("upload", 3, TRANSFER_BACKOFF_CAP_SECS, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::Error::new(SyncError::NetworkUnavailable))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: anyhow::Result<()> =
            with_retry("upload", 5, TRANSFER_BACKOFF_CAP_SECS, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::Error::new(SyncError::ChecksumMismatch("a".into())))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
