use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for storage and embedding-backend calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

/// Retry a fallible async operation with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, config: RetryConfig) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retries", attempt);
                }
                return Ok(result);
            }
            Err(e) if attempt < config.max_retries => {
                warn!(
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    attempt + 1,
                    config.max_retries,
                    e,
                    delay
                );

                let jitter_amount = if config.jitter > 0.0 {
                    let jitter_ms = (delay.as_millis() as f64 * config.jitter) as u64;
                    Duration::from_millis(rand::random::<u64>() % jitter_ms.max(1))
                } else {
                    Duration::ZERO
                };

                sleep(delay + jitter_amount).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => {
                warn!("All {} retry attempts failed", config.max_retries);
                return Err(e);
            }
        }
    }

    unreachable!("retry loop always returns")
}

pub mod presets {
    use super::*;

    /// For embedding calls: the mock fallback is waiting, fail fast.
    pub fn embedding() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(4),
            jitter: 0.1,
        }
    }

    /// For storage round-trips: no fallback, worth a few more attempts.
    pub fn storage() -> RetryConfig {
        RetryConfig::default()
    }
}

/// Transient failures worth retrying: connection trouble, rate limits,
/// and server-side errors. Validation and auth failures are not.
pub fn is_retryable_error<E: std::fmt::Display>(error: &E) -> bool {
    let error_string = error.to_string().to_lowercase();

    error_string.contains("connection")
        || error_string.contains("timeout")
        || error_string.contains("timed out")
        || error_string.contains("refused")
        || error_string.contains("reset")
        || error_string.contains("broken pipe")
        || error_string.contains("temporarily")
        || error_string.contains("unavailable")
        || error_string.contains("too many requests")
        || error_string.contains("rate limit")
        || error_string.contains("429")
        || error_string.contains("502")
        || error_string.contains("503")
        || error_string.contains("504")
}
