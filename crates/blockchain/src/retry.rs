use shared::config::RetrySettings;
use shared::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Rate-limit aware retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// Calculate the delay for a given retry number (0-indexed)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64)
            * self.backoff_multiplier.powi(retry as i32);

        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    pub async fn run<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_with_backoff(operation_name, self, operation).await
    }
}

/// Execute a remote call, retrying only while it reports rate limiting
///
/// Any other error is returned on the spot: bad signatures, insufficient funds
/// and simulation failures do not heal by waiting. When the retry budget runs
/// out the last rate-limit error is wrapped in `Error::RetryExhausted`.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        debug!(
            "Executing '{}' - attempt {}/{}",
            operation_name,
            attempt + 1,
            max_attempts
        );

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        "'{}' succeeded on attempt {}/{}",
                        operation_name,
                        attempt + 1,
                        max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_rate_limited() => {
                debug!("'{}' failed without rate limiting, not retrying: {}", operation_name, e);
                return Err(e);
            }
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!(
                        "'{}' still rate limited after {} attempts: {}",
                        operation_name, max_attempts, e
                    );
                    return Err(Error::RetryExhausted {
                        operation: operation_name.to_string(),
                        attempts: max_attempts,
                        source: Box::new(e),
                    });
                }

                let delay = policy.calculate_delay(attempt);
                warn!(
                    "'{}' rate limited on attempt {}/{}, backing off {:?}: {}",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    delay,
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let policy = fast_policy();

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_calculate_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };

        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        // would be 8s
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_succeeds() {
        let policy = fast_policy();
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff("get_balance", &policy, || {
            let attempts = attempts_clone.clone();
            async move {
                let mut times = attempts.lock().unwrap();
                times.push(Instant::now());
                if times.len() < 3 {
                    Err(Error::RateLimited("429 Too Many Requests".to_string()))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);

        let times = attempts.lock().unwrap();
        assert_eq!(times.len(), 3);
        let delays: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_millis(100) && delays[0] < Duration::from_millis(110));
        assert!(delays[1] >= Duration::from_millis(200) && delays[1] < Duration::from_millis(210));
        assert!(delays[1] > delays[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let policy = fast_policy();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<u64> = retry_with_backoff("send_transaction", &policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transaction("insufficient funds for fee".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Transaction(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let policy = fast_policy();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<()> = policy
            .run("get_program_accounts", || {
                let counter = counter_clone.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::SolanaRpc(format!("HTTP 429 on call {}", n)))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        match result {
            Err(Error::RetryExhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "get_program_accounts");
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "Solana RPC error: HTTP 429 on call 3");
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_exhausts_immediately() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..fast_policy()
        };

        let result: Result<()> = policy
            .run("get_balance", || async {
                Err(Error::RateLimited("busy".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 1, .. })));
    }
}
