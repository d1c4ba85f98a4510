//! Transient-fault retry for driver I/O: 3 attempts, exponential backoff
//! from 100 ms, capped at 2 s. Cancellation aborts between attempts.

use std::future::Future;
use std::time::Duration;

use hubd_core::{HubError, HubResult};
use tokio_util::sync::CancellationToken;

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_millis(100);
pub const BACKOFF_CAP: Duration = Duration::from_secs(2);

pub fn backoff_for(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    BASE_BACKOFF.saturating_mul(factor).min(BACKOFF_CAP)
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, backing off between failures.
pub async fn with_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> HubResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HubResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(err);
                }
                let wait = backoff_for(attempt - 1);
                tracing::warn!(
                    op = label,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "transient driver failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(HubError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(0), Duration::from_millis(100));
        assert_eq!(backoff_for(1), Duration::from_millis(200));
        assert_eq!(backoff_for(2), Duration::from_millis(400));
        assert_eq!(backoff_for(10), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = CancellationToken::new();
        let result = with_backoff(&cancel, "probe", move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HubError::driver("flaky"))
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
    async fn gives_up_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let cancel = CancellationToken::new();
        let result: HubResult<()> = with_backoff(&cancel, "probe", move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HubError::driver("down"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: HubResult<()> =
            with_backoff(&cancel, "probe", || async { Ok(()) }).await;
        assert!(matches!(result, Err(HubError::Cancelled)));
    }
}
