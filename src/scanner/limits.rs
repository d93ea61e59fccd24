//! Rate limiting and probe budgets

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;

/// Token bucket shared across the run. `acquire` suspends the caller
/// until a token is available, bounding aggregate outbound request rate
/// independent of worker count.
pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let period = if refill_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / refill_per_sec)
        } else {
            Duration::from_secs(1)
        };
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
            .allow_burst(NonZeroU32::new(capacity).unwrap_or(nonzero!(1u32)));

        Self {
            inner: GovernorRateLimiter::direct(quota),
        }
    }

    /// Wait for and consume one token
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}

/// Combined count/deadline limiter bounding total active-probe work per
/// run. Once exhausted or expired it permanently refuses.
pub struct BudgetGate {
    used: AtomicU64,
    cap: u64,
    deadline: Instant,
}

impl BudgetGate {
    pub fn new(cap: u64, time_budget: Duration) -> Self {
        Self {
            used: AtomicU64::new(0),
            cap,
            deadline: Instant::now() + time_budget,
        }
    }

    /// Atomically claim one probe execution. True only while the
    /// post-increment count is within the cap and the deadline has not
    /// passed.
    pub fn try_consume(&self) -> bool {
        if Instant::now() >= self.deadline {
            return false;
        }
        self.used.fetch_add(1, Ordering::SeqCst) + 1 <= self.cap
    }

    /// Non-consuming check used to skip plan construction entirely
    pub fn is_open(&self) -> bool {
        Instant::now() < self.deadline && self.used.load(Ordering::SeqCst) < self.cap
    }

    /// Probes consumed so far (may exceed the cap by refused attempts)
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst).min(self.cap)
    }
}
