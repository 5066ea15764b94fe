//! Bounded retry for transient venue failures.

use crate::{VenueError, VenueResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `max_attempts` times, sleeping the error's suggested delay
/// between attempts. Permanent errors surface immediately.
pub async fn with_retry<T, F, Fut>(label: &str, max_attempts: u32, mut op: F) -> VenueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VenueResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = err
                    .suggested_retry_delay()
                    .unwrap_or(Duration::from_secs(1));
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    label, attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("ticker", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VenueError::Transient("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: VenueResult<()> = with_retry("withdraw", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::Auth("rejected".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_surfaces_error() {
        let result: VenueResult<()> = with_retry("book", 2, || async {
            Err(VenueError::Timeout("slow".into()))
        })
        .await;
        assert!(matches!(result, Err(VenueError::Timeout(_))));
    }
}
