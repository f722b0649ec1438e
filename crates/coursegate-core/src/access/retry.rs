//! ============================================================================
//! RPC Retry Logic - Exponential backoff for balance reads
//! ============================================================================
//! Used by oracle implementations (never by the evaluator itself):
//! - Exponential backoff with jitter between attempts
//! - Error classification (retryable vs permanent vs rate limited)
//! - Malformed responses are returned immediately, never retried
//! ============================================================================

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::oracle::OracleError;

/// Configuration for RPC retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify an RPC error message to decide whether a retry can help
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        return ErrorKind::RateLimited;
    }

    if lower.contains("execution reverted")
        || lower.contains("invalid argument")
        || lower.contains("invalid params")
        || lower.contains("method not found")
        || lower.contains("invalid address")
    {
        return ErrorKind::Permanent;
    }

    // Connection resets, timeouts, 5xx and anything unknown
    ErrorKind::Retryable
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let capped_delay = config
        .base_delay_ms
        .saturating_mul(multiplier)
        .min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // 0-50% extra
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OracleError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = OracleError::Unavailable(format!("{}: no attempts made", label));

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = calculate_delay(attempt - 1, config);
            debug!("{}: retry attempt {} after {:?}", label, attempt, delay);
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ OracleError::MalformedResponse(_)) => return Err(e),
            Err(OracleError::Unavailable(message)) => {
                let kind = classify_error(&message);
                warn!(
                    "{}: attempt {}/{} failed ({:?}): {}",
                    label,
                    attempt + 1,
                    attempts,
                    kind,
                    message
                );

                match kind {
                    ErrorKind::Permanent => return Err(OracleError::Unavailable(message)),
                    ErrorKind::RateLimited if attempt + 1 < attempts => {
                        let rate_limit_delay = Duration::from_millis(config.max_delay_ms);
                        warn!("{}: rate limited, waiting {:?}", label, rate_limit_delay);
                        sleep(rate_limit_delay).await;
                    }
                    _ => {}
                }

                last_error = OracleError::Unavailable(message);
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("execution reverted"), ErrorKind::Permanent);
        assert_eq!(classify_error("invalid params: bad address"), ErrorKind::Permanent);
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(classify_error("connection refused"), ErrorKind::Retryable);
        assert_eq!(classify_error("operation timed out"), ErrorKind::Retryable);
        assert_eq!(classify_error("unknown error xyz"), ErrorKind::Retryable);
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(250));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(500));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(40, &config), Duration::from_millis(2000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig {
            jitter: true,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            ..Default::default()
        };

        for _ in 0..10 {
            let delay = calculate_delay(0, &config);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast(), "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OracleError::Unavailable("connection reset".into()))
                } else {
                    Ok(42u128)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<u128, _> = with_retry(&fast(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Unavailable("timeout".into())) }
        })
        .await;

        assert_eq!(result, Err(OracleError::Unavailable("timeout".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_and_malformed_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<u128, _> = with_retry(&fast(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::Unavailable("execution reverted".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let attempts = AtomicU32::new(0);
        let result: Result<u128, _> = with_retry(&fast(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OracleError::MalformedResponse("0xnothex".into())) }
        })
        .await;
        assert!(matches!(result, Err(OracleError::MalformedResponse(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_config_none() {
        assert_eq!(RetryConfig::none().max_attempts, 1);
    }
}
