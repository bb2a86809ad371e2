//! Per-item retry budget
//!
//! Classification calls are retried a fixed number of times with
//! exponential backoff. The final error is returned to the caller, which
//! records it against the item instead of aborting the phase.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Run `operation` up to `attempts` times (at least once).
///
/// `operation` receives the 1-based attempt number. Backoff starts at
/// `base_backoff` and doubles after each failure, capped at 2s.
pub async fn retry_with_budget<F, Fut, T, E>(
    operation_name: &str,
    attempts: u32,
    base_backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut backoff = base_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt >= attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry after backoff"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
