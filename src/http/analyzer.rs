//! HTTP analyzer
//!
//! `analyze` never fails: transport problems become the unreachable
//! sentinel so the retry loop can treat every outcome uniformly.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::ScanConfig;
use crate::error::HttpError;

use super::response::ResponseData;
use super::retry::RetryPolicy;

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Retry-After values above this are clamped (seconds)
const RETRY_AFTER_CAP_SECS: u64 = 30;

/// Suspension seam for the retry loop
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Production waiter backed by the tokio timer
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Issues analysis requests and normalizes responses
pub struct HttpAnalyzer {
    client: reqwest::Client,
    raw_client: reqwest::Client,
}

impl HttpAnalyzer {
    pub fn new(config: &ScanConfig) -> Result<Self, HttpError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

        let redirects = if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirects)
            .user_agent(&config.user_agent)
            .default_headers(default_headers.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| HttpError::ClientBuild(e.to_string()))?;

        // Probes that must observe raw 3xx responses use this variant.
        let raw_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(&config.user_agent)
            .default_headers(default_headers)
            .build()
            .map_err(|e| HttpError::ClientBuild(e.to_string()))?;

        Ok(Self { client, raw_client })
    }

    /// Client that never follows redirects
    pub fn raw_client(&self) -> &reqwest::Client {
        &self.raw_client
    }

    /// Issue a single GET. Always returns a response record; a transport
    /// failure yields the unreachable sentinel with elapsed time up to
    /// the failure.
    pub async fn analyze(&self, url: &str) -> ResponseData {
        let start = Instant::now();

        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                let header_pairs: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();

                let url = response.url().to_string();
                let body = response.text().await.unwrap_or_default();
                let elapsed_ms = start.elapsed().as_millis() as u64;

                ResponseData::new(url, status, header_pairs, body, elapsed_ms)
            }
            Err(err) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::warn!(url, error = %err, "request failed");
                ResponseData::unreachable(url, elapsed_ms)
            }
        }
    }

    /// Run `analyze` under the given retry policy. Retries are strictly
    /// bounded; the call always returns the last obtained result.
    pub async fn analyze_with_retry(
        &self,
        url: &str,
        policy: &dyn RetryPolicy,
        waiter: &dyn Waiter,
    ) -> ResponseData {
        run_with_retry(|| self.analyze(url), policy, waiter).await
    }
}

/// The retry state machine, factored out so it can be driven by a
/// scripted fetcher in tests.
///
/// The attempt counter starts at 1. A server-supplied `Retry-After`
/// (integer seconds, capped) takes precedence over the policy's backoff.
/// The wait is the single suspension point.
pub async fn run_with_retry<F, Fut>(
    mut fetch: F,
    policy: &dyn RetryPolicy,
    waiter: &dyn Waiter,
) -> ResponseData
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ResponseData>,
{
    let mut attempt: u32 = 1;
    loop {
        let response = fetch().await;

        if !policy.should_retry(response.status, attempt) {
            return response;
        }

        let delay = retry_after_delay(&response).unwrap_or_else(|| policy.next_delay(attempt));
        tracing::debug!(
            url = %response.url,
            status = response.status,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying"
        );
        waiter.wait(delay).await;

        attempt += 1;
        if attempt > policy.max_attempts() {
            // Bounded: hand back the last result even though it was
            // nominally retryable.
            return response;
        }
    }
}

/// Parse a `Retry-After` header in its integer-seconds form, capped at
/// [`RETRY_AFTER_CAP_SECS`]. The HTTP-date form is ignored.
fn retry_after_delay(response: &ResponseData) -> Option<Duration> {
    let raw = response.header("retry-after")?;
    let secs: i64 = raw.trim().parse().ok()?;
    if secs < 0 {
        return None;
    }
    Some(Duration::from_secs((secs as u64).min(RETRY_AFTER_CAP_SECS)))
}
