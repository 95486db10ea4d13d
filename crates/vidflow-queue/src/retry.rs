//! Short in-process retries for broker calls.
//!
//! These are distinct from the broker-level retry budget carried in the
//! `x-retry-count` header: they absorb blips (a dropped connection, a
//! failover) before a delivery is settled.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings for one kind of call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each one
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Name used in log lines
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "broker call".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of [`retry_async`].
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed; `error` is the last one
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Drop the attempt count and return a plain `Result`.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Run `operation` until it succeeds or the retries are used up.
///
/// ```ignore
/// let config = RetryConfig::new("publish outcome");
/// let outcome = retry_async(&config, || broker.publish(queue, envelope.clone()))
///     .await
///     .into_result()?;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if retries < config.max_retries => {
                retries += 1;
                let delay = config.delay_before(retries);
                debug!(
                    "{} failed (retry {} of {}), next attempt in {:?}: {}",
                    config.operation_name, retries, config.max_retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: retries + 1,
                }
            }
        }
    }
}

/// Counts consecutive failures of a looping call so that an outage logs a
/// handful of lines instead of one per poll.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            debug!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failure. Returns `true` when it should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures == self.max_logged_failures + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
        }
        self.consecutive_failures <= self.max_logged_failures
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new("publish").with_base_delay(Duration::from_millis(100));
        assert_eq!(config.delay_before(1), Duration::from_millis(100));
        assert_eq!(config.delay_before(2), Duration::from_millis(200));
        assert_eq!(config.delay_before(3), Duration::from_millis(400));
        assert_eq!(config.delay_before(20), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_suppresses_after_limit() {
        let mut tracker = FailureTracker::new(2);
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.failure_count(), 4);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let config = RetryConfig::new("publish");
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection reset")
                } else {
                    Ok("1-0")
                }
            }
        })
        .await;

        assert_eq!(result.into_result(), Ok("1-0"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let config = RetryConfig::new("publish").with_max_retries(2);
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("broker down") }
        })
        .await;

        match result {
            RetryResult::Failed { error, attempts } => {
                assert_eq!(error, "broker down");
                assert_eq!(attempts, 3);
            }
            RetryResult::Success(_) => panic!("expected failure"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
