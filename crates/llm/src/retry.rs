//! Bounded retry for plain (non-streaming) calls.
//!
//! Rate-limit failures wait for the delay the service suggests; network
//! failures back off exponentially. Streams are never retried here: a
//! partially consumed stream cannot be re-issued safely.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::error::{TransportError, TransportResult};

/// How many times, and how patiently, a failed call is re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Run `op`, re-issuing it while it fails with a retryable error and the
/// retry budget lasts.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt: u32 = 0;
    backoff::future::retry(backoff, || {
        attempt += 1;
        let current = attempt;
        let call = op();
        async move {
            match call.await {
                Ok(value) => Ok(value),
                Err(err) if err.is_retryable() && current <= policy.max_retries => {
                    warn!(
                        call = label,
                        attempt = current,
                        max_retries = policy.max_retries,
                        error = %err,
                        "retrying"
                    );
                    Err(match err.retry_after() {
                        Some(delay) => backoff::Error::retry_after(err, delay),
                        None => backoff::Error::transient(err),
                    })
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        }
    })
    .await
}

/// Delay before re-running a rate-limited stream open; `None` when the error
/// is not worth retrying.
pub fn rate_limit_delay(err: &TransportError, default: Duration) -> Option<Duration> {
    match err {
        TransportError::RateLimited { .. } => Some(err.retry_after().unwrap_or(default)),
        _ => None,
    }
}
