//! robots.txt fetching, parsing and caching
//!
//! Policies are cached per origin with tiered TTLs: successful fetches
//! live for the configured TTL, failures for a fixed shorter window so
//! an unreachable host is not hammered with robots re-fetches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use url::Url;

use crate::http::HttpAnalyzer;

/// Failure entries expire after this fixed window.
const FAILURE_TTL: Duration = Duration::from_secs(10 * 60);

/// Injectable time source so expiry is deterministic under test
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// One allow/disallow rule from a user-agent group
#[derive(Debug, Clone)]
struct RobotsRule {
    allow: bool,
    path: String,
}

/// Parsed per-origin ruleset, already narrowed to the relevant
/// user-agent group
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    rules: Vec<RobotsRule>,
}

impl RobotsPolicy {
    /// Permissive policy used as the fetch-failure fallback
    pub fn allow_all() -> Self {
        Self { rules: Vec::new() }
    }

    /// Parse robots.txt, keeping the groups matching `user_agent` or,
    /// when none match, the wildcard groups.
    pub fn parse(text: &str, user_agent: &str) -> Self {
        struct Group {
            agents: Vec<String>,
            rules: Vec<RobotsRule>,
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut in_rules = false;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group; a
                    // user-agent line after rules opens a new group.
                    if in_rules || groups.is_empty() {
                        groups.push(Group {
                            agents: Vec::new(),
                            rules: Vec::new(),
                        });
                        in_rules = false;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    if let Some(group) = groups.last_mut() {
                        group.rules.push(RobotsRule {
                            allow: field == "allow",
                            path: value.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        let agent = user_agent.to_ascii_lowercase();
        let specific: Vec<RobotsRule> = groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
            .flat_map(|g| g.rules.iter().cloned())
            .collect();

        let rules = if specific.is_empty() {
            groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .flat_map(|g| g.rules.iter().cloned())
                .collect()
        } else {
            specific
        };

        Self { rules }
    }

    /// Evaluate the policy for a URL: the longest matching rule wins,
    /// allow wins ties, no matching rule means allowed.
    pub fn allows(&self, url: &str) -> bool {
        let path = match Url::parse(url) {
            Ok(u) => u.path().to_string(),
            Err(_) => return true,
        };

        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            // An empty Disallow value means "allow everything".
            if rule.path.is_empty() {
                continue;
            }
            if path.starts_with(&rule.path) {
                let len = rule.path.len();
                let better = match best {
                    None => true,
                    Some((best_len, best_allow)) => {
                        len > best_len || (len == best_len && rule.allow && !best_allow)
                    }
                };
                if better {
                    best = Some((len, rule.allow));
                }
            }
        }

        best.map_or(true, |(_, allow)| allow)
    }
}

struct CacheEntry {
    policy: Arc<RobotsPolicy>,
    expires_at: Instant,
}

/// Per-origin robots policy cache
pub struct RobotsCache {
    analyzer: Arc<HttpAnalyzer>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    success_ttl: Duration,
    clock: Arc<dyn Clock>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(
        analyzer: Arc<HttpAnalyzer>,
        success_ttl: Duration,
        clock: Arc<dyn Clock>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            analyzer,
            entries: RwLock::new(HashMap::new()),
            success_ttl,
            clock,
            user_agent: user_agent.into(),
        }
    }

    /// Whether the origin's policy allows fetching this URL
    pub async fn allows(&self, url: &str) -> bool {
        let Some(origin) = origin_of(url) else {
            return true;
        };
        self.policy_for(&origin).await.allows(url)
    }

    async fn policy_for(&self, origin: &str) -> Arc<RobotsPolicy> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(origin) {
                if self.clock.now() < entry.expires_at {
                    return Arc::clone(&entry.policy);
                }
            }
        }

        let response = self
            .analyzer
            .analyze(&format!("{origin}/robots.txt"))
            .await;

        let (policy, ttl) = if response.is_success() {
            (
                RobotsPolicy::parse(&response.body, &self.user_agent),
                self.success_ttl,
            )
        } else {
            tracing::debug!(
                origin,
                status = response.status,
                "robots fetch failed, caching permissive fallback"
            );
            (RobotsPolicy::allow_all(), FAILURE_TTL)
        };

        let policy = Arc::new(policy);
        // Entries are replaced wholesale, never mutated in place.
        self.entries.write().insert(
            origin.to_string(),
            CacheEntry {
                policy: Arc::clone(&policy),
                expires_at: self.clock.now() + ttl,
            },
        );
        policy
    }
}

/// scheme://host[:port] key for the cache
fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}
