//! Bounded-concurrency scan dispatch
//!
//! Runs the per-URL pipeline over the crawler's URL list with at most N
//! pipelines in flight, admitting each through the shared rate limiter.
//! Finding order across URLs is unspecified; contribution must not lose
//! or duplicate entries.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::findings::Vulnerability;
use super::limits::RateLimiter;
use super::stats::ScanStats;

/// Result of one per-URL pipeline
pub struct UrlOutcome {
    pub findings: Vec<Vulnerability>,
    pub attempts: u64,
    pub retries: u64,
    pub wall_ms: u64,
}

/// The per-URL pipeline seam; the production implementation is the
/// detector orchestrator.
#[async_trait]
pub trait UrlProcessor: Send + Sync {
    async fn process(&self, url: &str) -> UrlOutcome;
}

/// Concurrency-capped dispatcher over discovered URLs
pub struct ScanCoordinator {
    concurrency: usize,
    limiter: Arc<RateLimiter>,
    stats: Arc<ScanStats>,
}

impl ScanCoordinator {
    pub fn new(concurrency: usize, limiter: Arc<RateLimiter>, stats: Arc<ScanStats>) -> Self {
        Self {
            concurrency,
            limiter,
            stats,
        }
    }

    /// Run the pipeline across all URLs and return the merged findings.
    pub async fn run(
        &self,
        urls: Vec<String>,
        processor: Arc<dyn UrlProcessor>,
    ) -> Vec<Vulnerability> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let findings: Arc<Mutex<Vec<Vulnerability>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();

        for url in urls {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let limiter = Arc::clone(&self.limiter);
            let stats = Arc::clone(&self.stats);
            let findings = Arc::clone(&findings);
            let processor = Arc::clone(&processor);

            tasks.spawn(async move {
                let _permit = permit;
                limiter.acquire().await;
                stats.enter();

                let outcome = processor.process(&url).await;

                stats.record_url(outcome.attempts, outcome.retries, outcome.wall_ms);
                findings.lock().extend(outcome.findings);
                stats.exit();
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "pipeline task panicked");
            }
        }

        let mut findings = findings.lock();
        std::mem::take(&mut *findings)
    }
}
