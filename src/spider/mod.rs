//! Breadth-first crawler
//!
//! Discovery is a pre-pass: the crawler produces the full visited-URL
//! list before any analysis begins, consulting robots policy and the
//! exclusion rules as it goes. A single page's failure never aborts the
//! crawl.

pub mod robots;
pub mod url;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::http::{HttpAnalyzer, STATUS_UNREACHABLE};

use self::robots::RobotsCache;
use self::url::{host_of, normalize_url, ExclusionMatcher};

/// Link-extraction collaborator. An error from `links` is treated as
/// "zero links found" by the crawler.
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn links(&self, url: &str) -> Result<Vec<String>>;
}

/// Production link source: fetches the page and extracts anchors, form
/// actions and src references from the HTML.
pub struct HtmlLinkSource {
    analyzer: Arc<HttpAnalyzer>,
}

impl HtmlLinkSource {
    pub fn new(analyzer: Arc<HttpAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl LinkSource for HtmlLinkSource {
    async fn links(&self, url: &str) -> Result<Vec<String>> {
        let response = self.analyzer.analyze(url).await;
        if response.status == STATUS_UNREACHABLE || !response.is_html() {
            return Ok(Vec::new());
        }
        Ok(extract_links(&response.body, url))
    }
}

/// Extract candidate links from HTML, resolved against the base URL
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let mut links = Vec::new();

    let base = match ::url::Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return links,
    };

    let document = scraper::Html::parse_document(html);

    let a_selector = scraper::Selector::parse("a[href]").unwrap();
    for element in document.select(&a_selector) {
        if let Some(href) = element.value().attr("href") {
            if let Ok(resolved) = base.join(href) {
                links.push(resolved.to_string());
            }
        }
    }

    let form_selector = scraper::Selector::parse("form[action]").unwrap();
    for element in document.select(&form_selector) {
        if let Some(action) = element.value().attr("action") {
            if let Ok(resolved) = base.join(action) {
                links.push(resolved.to_string());
            }
        }
    }

    let src_selector = scraper::Selector::parse("[src]").unwrap();
    for element in document.select(&src_selector) {
        if let Some(src) = element.value().attr("src") {
            if let Ok(resolved) = base.join(src) {
                links.push(resolved.to_string());
            }
        }
    }

    links.sort();
    links.dedup();
    links
}

/// BFS crawler producing the deduplicated visited-URL list
pub struct Crawler {
    target: String,
    max_depth: u32,
    same_domain_only: bool,
    respect_robots: bool,
    exclusions: ExclusionMatcher,
    robots: Arc<RobotsCache>,
}

impl Crawler {
    pub fn new(config: &ScanConfig, exclusions: ExclusionMatcher, robots: Arc<RobotsCache>) -> Self {
        Self {
            target: config.target.clone(),
            max_depth: config.max_depth,
            same_domain_only: config.same_domain_only,
            respect_robots: config.respect_robots,
            exclusions,
            robots,
        }
    }

    /// Traverse from the seed and return the visited URLs in BFS order.
    pub async fn crawl(&self, source: &dyn LinkSource) -> Result<Vec<String>, ScanError> {
        let seed =
            normalize_url(&self.target).ok_or_else(|| ScanError::InvalidTarget(self.target.clone()))?;
        let seed_host = host_of(&seed);

        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut visited: Vec<String> = Vec::new();

        seen.insert(seed.clone());
        queue.push_back((seed, 0));

        while let Some((url, depth)) = queue.pop_front() {
            if self.respect_robots && !self.robots.allows(&url).await {
                // Disallowed nodes are discarded entirely: not visited,
                // children never discovered.
                continue;
            }

            visited.push(url.clone());

            if depth >= self.max_depth {
                continue;
            }

            let links = match source.links(&url).await {
                Ok(links) => links,
                Err(err) => {
                    tracing::debug!(url = %url, error = %err, "link extraction failed");
                    Vec::new()
                }
            };

            for raw in links {
                let Some(normalized) = normalize_url(&raw) else {
                    continue;
                };
                if self.same_domain_only && host_of(&normalized) != seed_host {
                    continue;
                }
                if self.exclusions.is_excluded(&normalized) {
                    continue;
                }
                if self.respect_robots && !self.robots.allows(&normalized).await {
                    continue;
                }
                if seen.insert(normalized.clone()) {
                    queue.push_back((normalized, depth + 1));
                }
            }
        }

        tracing::info!(visited = visited.len(), "crawl complete");
        Ok(visited)
    }
}
