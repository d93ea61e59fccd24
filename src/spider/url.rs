//! URL canonicalization and exclusion rules
//!
//! Two URLs are the same for dedup purposes iff their normalized forms
//! are string-equal.

use regex::Regex;
use url::Url;

use crate::error::ConfigError;

/// Canonicalize a URL: lowercase scheme and host, strip default ports,
/// drop the fragment, leave path and query untouched. Returns `None`
/// for anything that does not parse as an http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.into())
}

/// Host of a normalized URL, for same-domain checks
pub fn host_of(normalized: &str) -> Option<String> {
    Url::parse(normalized)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// One compiled exclusion rule
enum ExclusionRule {
    /// `re:`-prefixed rule, matched with find semantics against the full URL
    Regex(Regex),
    /// Glob rule (`*`/`?`), compiled unanchored, substring semantics
    Glob(Regex),
    /// Anything else: literal substring test against the URL path
    PathLiteral(String),
}

impl ExclusionRule {
    fn parse(rule: &str) -> Result<Self, ConfigError> {
        if let Some(pattern) = rule.strip_prefix("re:") {
            let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidExclusion {
                rule: rule.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(ExclusionRule::Regex(regex));
        }

        if rule.contains('*') || rule.contains('?') {
            let regex =
                Regex::new(&glob_to_regex(rule)).map_err(|e| ConfigError::InvalidExclusion {
                    rule: rule.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(ExclusionRule::Glob(regex));
        }

        Ok(ExclusionRule::PathLiteral(rule.to_string()))
    }

    fn matches(&self, url: &str, path: &str) -> bool {
        match self {
            ExclusionRule::Regex(regex) | ExclusionRule::Glob(regex) => regex.is_match(url),
            // Pure string matching, not path-segment aware: `/admin`
            // also matches `/administrator`.
            ExclusionRule::PathLiteral(literal) => path.contains(literal.as_str()),
        }
    }
}

/// Translate a glob into an unanchored regex: `*` matches any run of
/// characters, `?` any single character.
fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() * 2);
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    pattern
}

/// Ordered exclusion-rule evaluator; first match excludes
pub struct ExclusionMatcher {
    rules: Vec<ExclusionRule>,
}

impl ExclusionMatcher {
    pub fn new(rules: &[String]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| ExclusionRule::parse(rule))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        self.rules.iter().any(|rule| rule.matches(url, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_lowercases_and_strips() {
        assert_eq!(
            normalize_url("HTTP://EXAMPLE.com:80/Path?Q=1#frag").as_deref(),
            Some("http://example.com/Path?Q=1")
        );
        assert_eq!(
            normalize_url("https://Example.com:443/").as_deref(),
            Some("https://example.com/")
        );
        // Non-default ports survive.
        assert_eq!(
            normalize_url("http://example.com:8080/a").as_deref(),
            Some("http://example.com:8080/a")
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "http://Example.COM/",
            "https://example.com:443/a/b?x=1#top",
            "http://example.com:8080/x?a=b&c=d",
        ] {
            let once = normalize_url(raw).unwrap();
            let twice = normalize_url(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalization_rejects_garbage_and_other_schemes() {
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("mailto:a@example.com").is_none());
        assert!(normalize_url("javascript:void(0)").is_none());
    }

    #[test]
    fn regex_rules_use_find_semantics() {
        let matcher = ExclusionMatcher::new(&[r"re:logout".to_string()]).unwrap();
        assert!(matcher.is_excluded("https://example.com/user/logout?next=/"));
        assert!(!matcher.is_excluded("https://example.com/login"));
    }

    #[test]
    fn glob_rules_are_unanchored() {
        let matcher = ExclusionMatcher::new(&["*.pdf".to_string()]).unwrap();
        assert!(matcher.is_excluded("https://example.com/docs/manual.pdf"));
        assert!(matcher.is_excluded("https://example.com/a.pdf?download=1"));
        assert!(!matcher.is_excluded("https://example.com/docs/manual.html"));

        let single = ExclusionMatcher::new(&["/v?/".to_string()]).unwrap();
        assert!(single.is_excluded("https://example.com/v1/users"));
        assert!(!single.is_excluded("https://example.com/v12/users"));
    }

    #[test]
    fn literal_rules_match_path_substrings() {
        let matcher = ExclusionMatcher::new(&["/admin".to_string()]).unwrap();
        assert!(matcher.is_excluded("https://example.com/admin"));
        // Not segment aware: proper superstrings match too.
        assert!(matcher.is_excluded("https://example.com/administrator/login"));
        assert!(!matcher.is_excluded("https://example.com/?page=/admin"));
    }

    #[test]
    fn malformed_regex_is_a_config_error() {
        assert!(ExclusionMatcher::new(&["re:[".to_string()]).is_err());
    }
}
