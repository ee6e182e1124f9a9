//! Exponential backoff retry wrapper for provider calls.
//!
//! Wraps every provider call: base delay 1s, cap 60s, optional jitter with
//! half-width `0.5 * delay`, max 3 attempts. On final failure the caller
//! should emit `APIError` and propagate. On any retry attempt `on_retry` is
//! invoked so the caller can emit an observable notice (the core's
//! `MessageRequest`/retry event), matching "On any retry attempt, emit an
//! observable notice chunk so the UI can surface pacing."

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
pub const MAX_ATTEMPTS: usize = 3;

/// Details of a retry about to happen, for the caller's notice emission.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    pub attempt: usize,
    pub max_attempts: usize,
    pub delay: Duration,
    pub error: String,
}

fn backoff_delay(attempt: usize, jitter: bool) -> Duration {
    let scale = 1u32 << (attempt.saturating_sub(1)).min(6) as u32;
    let raw = BASE_DELAY.saturating_mul(scale).min(MAX_DELAY);
    if !jitter {
        return raw;
    }
    let half_width = raw.as_secs_f64() * 0.5;
    let offset = rand::thread_rng().gen_range(-half_width..=half_width);
    let jittered = (raw.as_secs_f64() + offset).max(0.0);
    Duration::from_secs_f64(jittered)
}

/// Retry a whole call (not just stream creation) on retryable errors.
///
/// `call` is invoked up to [`MAX_ATTEMPTS`] times. On success, returns
/// immediately. On a non-retryable error, returns immediately. On a
/// retryable error, sleeps with jittered exponential backoff and retries,
/// invoking `on_retry` before each sleep.
pub async fn with_retry<F, Fut, T>(
    mut call: F,
    mut on_retry: impl FnMut(RetryNotice),
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt, true);
                on_retry(RetryNotice {
                    attempt,
                    max_attempts: MAX_ATTEMPTS,
                    delay,
                    error: err.to_string(),
                });
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Retry stream *creation* only. Once a stream has yielded its first chunk,
/// the caller must treat a subsequent mid-stream failure as final (a
/// partial message is discarded, not silently retried) per the streaming
/// robustness contract in the spec.
pub async fn with_stream_retry<F, Fut, S>(
    mut create: F,
    mut on_retry: impl FnMut(RetryNotice),
) -> Result<S, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, ProviderError>>,
{
    with_retry(&mut create, &mut on_retry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let result: Result<u32, ProviderError> =
            with_retry(|| async { Ok(42) }, |_| panic!("should not retry")).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_retryable_error_then_succeeds() {
        tokio::time::pause();
        let attempts = Cell::new(0);
        let notices = Cell::new(0);
        let result: Result<u32, ProviderError> = with_retry(
            || {
                let n = attempts.get() + 1;
                attempts.set(n);
                async move {
                    if n < 2 {
                        Err(ProviderError::Transient("boom".into()))
                    } else {
                        Ok(7)
                    }
                }
            },
            |_notice| notices.set(notices.get() + 1),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.get(), 2);
        assert_eq!(notices.get(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        tokio::time::pause();
        let attempts = Cell::new(0);
        let result: Result<u32, ProviderError> = with_retry(
            || {
                attempts.set(attempts.get() + 1);
                async { Err(ProviderError::Overloaded("still down".into())) }
            },
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.get(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn fatal_error_never_retries() {
        let attempts = Cell::new(0);
        let result: Result<u32, ProviderError> = with_retry(
            || {
                attempts.set(attempts.get() + 1);
                async { Err(ProviderError::AuthFailed("nope".into())) }
            },
            |_| panic!("fatal errors must not retry"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
