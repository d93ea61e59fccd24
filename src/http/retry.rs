//! Retry decision policies with exponential backoff
//!
//! A policy is a pure decision function; the analyzer owns the loop and
//! the waiting. `CountingRetryPolicy` wraps any policy to tally granted
//! retries for telemetry without altering delegate behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

use super::response::STATUS_UNREACHABLE;

/// Decision interface consulted between attempts
pub trait RetryPolicy: Send + Sync {
    /// Whether the given status at the given attempt (1-based) warrants
    /// another try
    fn should_retry(&self, status: i32, attempt: u32) -> bool;

    /// Backoff delay before the attempt following `attempt`
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Hard ceiling on attempts
    fn max_attempts(&self) -> u32;
}

/// Default policy: retry 429, 5xx and transport failures with
/// exponential backoff and jitter
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl DefaultRetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    fn is_retryable(status: i32) -> bool {
        status == 429 || status >= 500 || status == STATUS_UNREACHABLE
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, status: i32, attempt: u32) -> bool {
        Self::is_retryable(status) && attempt < self.max_attempts
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_millis((base * jitter) as u64)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Decorator tallying how many retries were actually granted
pub struct CountingRetryPolicy<P: RetryPolicy> {
    inner: P,
    granted: AtomicU64,
}

impl<P: RetryPolicy> CountingRetryPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            granted: AtomicU64::new(0),
        }
    }

    /// Number of times a retry was granted so far
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::SeqCst)
    }
}

impl<P: RetryPolicy> RetryPolicy for CountingRetryPolicy<P> {
    fn should_retry(&self, status: i32, attempt: u32) -> bool {
        let retry = self.inner.should_retry(status, attempt);
        if retry {
            self.granted.fetch_add(1, Ordering::SeqCst);
        }
        retry
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.inner.next_delay(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.inner.max_attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_at_early_attempts() {
        let policy = DefaultRetryPolicy::default();
        for status in [429, 500, 502, 503, 599, STATUS_UNREACHABLE] {
            assert!(policy.should_retry(status, 1), "status {status} attempt 1");
            assert!(policy.should_retry(status, 2), "status {status} attempt 2");
            assert!(!policy.should_retry(status, 3), "status {status} attempt 3");
        }
    }

    #[test]
    fn non_retryable_statuses() {
        let policy = DefaultRetryPolicy::default();
        for status in [200, 204, 301, 302, 304, 400, 401, 403, 404, 418] {
            assert!(!policy.should_retry(status, 1), "status {status}");
        }
    }

    #[test]
    fn delay_is_exponential_within_jitter_bounds() {
        let policy = DefaultRetryPolicy::default();
        for attempt in 1..=4u32 {
            let expected = 250f64 * 2f64.powi(attempt as i32 - 1);
            for _ in 0..50 {
                let delay = policy.next_delay(attempt).as_millis() as f64;
                assert!(
                    delay >= expected * 0.9 && delay <= expected * 1.1,
                    "attempt {attempt}: {delay}ms outside ±10% of {expected}ms"
                );
            }
        }
    }

    #[test]
    fn counting_decorator_tallies_without_changing_decisions() {
        let policy = CountingRetryPolicy::new(DefaultRetryPolicy::default());

        assert!(policy.should_retry(500, 1));
        assert!(policy.should_retry(STATUS_UNREACHABLE, 2));
        assert!(!policy.should_retry(200, 1));
        assert!(!policy.should_retry(500, 3));

        assert_eq!(policy.granted(), 2);
        assert_eq!(policy.max_attempts(), 3);
    }
}
