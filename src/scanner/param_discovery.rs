//! Candidate parameter discovery
//!
//! Extracts injectable parameter names from a page body and the URL's
//! own query string, filters out tracking noise, and orders candidates
//! by priority: the URL's own query parameters first, then hinted
//! names, then the rest in discovery order.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Tracking and noise parameter names that are never worth injecting
const NOISE_PARAMS: &[&str] = &[
    "gclid", "dclid", "fbclid", "msclkid", "yclid", "twclid", "igshid", "ref", "referrer",
    "referer", "_ga", "_gl", "mc_cid", "mc_eid", "wbraid", "gbraid",
];

/// Query fragments in links or inline script literals: `?name=` / `&name=`
static QUERY_FRAGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[?&]([A-Za-z0-9_][A-Za-z0-9_\-\[\]]*)="#).unwrap());

/// Form field names: `name="..."` on inputs, selects, textareas
static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"name=["']([A-Za-z0-9_][A-Za-z0-9_\-\[\]]*)["']"#).unwrap());

/// Notable data attributes: `data-param`, `data-query`, `data-field`
static DATA_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"data-(?:param|query|field|filter)=["']([A-Za-z0-9_][A-Za-z0-9_\-]*)["']"#)
        .unwrap()
});

pub struct ParamDiscovery {
    hints: Vec<String>,
}

impl ParamDiscovery {
    pub fn new(hints: &[String]) -> Self {
        Self {
            hints: hints.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    /// De-noised, priority-ordered candidate parameter names for a page
    pub fn discover(&self, url: &str, body: &str) -> Vec<String> {
        let mut query_params: Vec<String> = Vec::new();
        if let Ok(parsed) = Url::parse(url) {
            for (key, _) in parsed.query_pairs() {
                query_params.push(key.to_string());
            }
        }

        let mut discovered: Vec<String> = Vec::new();
        for capture in QUERY_FRAGMENT_RE.captures_iter(body) {
            discovered.push(capture[1].to_string());
        }
        for capture in FIELD_NAME_RE.captures_iter(body) {
            discovered.push(capture[1].to_string());
        }
        for capture in DATA_ATTR_RE.captures_iter(body) {
            discovered.push(capture[1].to_string());
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut ordered: Vec<String> = Vec::new();

        let mut push = |name: &str| {
            if is_noise(name) {
                return;
            }
            if seen.insert(name.to_ascii_lowercase()) {
                ordered.push(name.to_string());
            }
        };

        for name in &query_params {
            push(name);
        }
        for name in &discovered {
            if self.hints.contains(&name.to_ascii_lowercase()) {
                push(name);
            }
        }
        for name in &discovered {
            push(name);
        }

        ordered
    }
}

fn is_noise(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || NOISE_PARAMS.contains(&lower.as_str())
}
