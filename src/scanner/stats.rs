//! Live scan telemetry
//!
//! All counters are atomic so workers can contribute concurrently; a
//! point-in-time immutable snapshot is derived on demand.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Shared telemetry counters
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Total HTTP attempts, including retries and probes
    attempts_total: AtomicU64,

    /// Retries actually granted
    retries_total: AtomicU64,

    /// Summed per-URL pipeline wall time
    url_wall_ms_total: AtomicU64,

    /// Summed per-URL attempt counts
    url_attempts_total: AtomicU64,

    /// Pipelines currently in flight
    in_flight: AtomicUsize,

    /// High-water-mark of observed concurrency; never decremented
    peak_concurrency: AtomicUsize,
}

impl ScanStats {
    /// Record one completed per-URL pipeline
    pub fn record_url(&self, attempts: u64, retries: u64, wall_ms: u64) {
        self.attempts_total.fetch_add(attempts, Ordering::SeqCst);
        self.retries_total.fetch_add(retries, Ordering::SeqCst);
        self.url_wall_ms_total.fetch_add(wall_ms, Ordering::SeqCst);
        self.url_attempts_total.fetch_add(attempts, Ordering::SeqCst);
    }

    /// Record one additional HTTP attempt outside the analyze pipeline
    /// (active probes)
    pub fn record_attempt(&self) {
        self.attempts_total.fetch_add(1, Ordering::SeqCst);
    }

    /// A pipeline entered the pool; folds the new in-flight count into
    /// the high-water-mark.
    pub fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(current, Ordering::SeqCst);
    }

    /// A pipeline left the pool
    pub fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    /// Derive an immutable snapshot of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let url_wall_ms_total = self.url_wall_ms_total.load(Ordering::SeqCst);
        let url_attempts_total = self.url_attempts_total.load(Ordering::SeqCst);

        StatsSnapshot {
            attempts_total: self.attempts_total.load(Ordering::SeqCst),
            retries_total: self.retries_total.load(Ordering::SeqCst),
            url_wall_ms_total,
            url_attempts_total,
            peak_concurrency: self.peak_concurrency.load(Ordering::SeqCst),
            avg_latency_ms: url_wall_ms_total / url_attempts_total.max(1),
        }
    }
}

/// Point-in-time telemetry snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub attempts_total: u64,
    pub retries_total: u64,
    pub url_wall_ms_total: u64,
    pub url_attempts_total: u64,
    pub peak_concurrency: usize,
    pub avg_latency_ms: u64,
}
