use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors that can tell whether the backend rejected the call for rate limiting.
pub trait RateLimited {
    fn is_rate_limited(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub retries: u32,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { retries: 3, initial_delay: Duration::from_millis(1000) }
    }
}

/// Runs `op`, retrying rate-limited failures with a doubling delay.
///
/// Any other failure, or a rate-limit failure once the retry budget is spent,
/// is returned to the caller unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RateLimited + Display,
{
    let mut retries_left = policy.retries;
    let mut delay = policy.initial_delay;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retries_left > 0 && err.is_rate_limited() => {
                warn!(
                    "⏳ Rate limit hit, retrying in {:.1}s (retries left: {}): {}",
                    delay.as_secs_f64(),
                    retries_left,
                    err
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                retries_left -= 1;
            }
            Err(err) => return Err(err),
        }
    }
}
