//! Passive anomaly engine
//!
//! Request-free heuristics over a single response. Each heuristic is
//! independent; one response may yield zero to three INFO findings.

use std::num::NonZeroUsize;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use url::Url;

use crate::http::ResponseData;

use super::findings::{IssueKind, Severity, Vulnerability};

/// Bounded number of per-path size baselines kept
const BASELINE_CAPACITY: usize = 512;

/// EWMA weighting: new = 0.7 * old + 0.3 * current
const EWMA_KEEP: f64 = 0.7;
const EWMA_MIX: f64 = 0.3;

/// Relative size change that triggers the anomaly
const SIZE_DELTA_THRESHOLD: f64 = 0.25;

/// How much of the body the structural classifier looks at
const CLASSIFY_WINDOW: usize = 256;

const SNIPPET_RADIUS: usize = 80;

static STACKTRACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?im)(Exception in thread "|"#,
        r"Traceback \(most recent call last\)|",
        r"^\s+at [\w.$<>]+\([\w.]+:\d+\)|",
        r"Fatal error: |",
        r"Stack trace:|",
        r"ORA-\d{5}|",
        r"System\.\w+(\.\w+)*Exception|",
        r"goroutine \d+ \[|",
        r"panicked at |",
        r"Warning: \w+\(\) expects",
        r")"
    ))
    .unwrap()
});

/// Which heuristics run
#[derive(Debug, Clone, Copy)]
pub struct AnomalyToggles {
    /// Off by default; noisy on dynamic pages
    pub size_delta: bool,
    pub content_type: bool,
    pub stacktrace: bool,
}

impl Default for AnomalyToggles {
    fn default() -> Self {
        Self {
            size_delta: false,
            content_type: true,
            stacktrace: true,
        }
    }
}

/// Structural content classification buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Json,
    Xml,
    Other,
    Blank,
}

/// Passive heuristics over single responses
pub struct AnomalyEngine {
    toggles: AnomalyToggles,
    baselines: Mutex<LruCache<String, f64>>,
}

impl AnomalyEngine {
    pub fn new(toggles: AnomalyToggles) -> Self {
        let capacity = NonZeroUsize::new(BASELINE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            toggles,
            baselines: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Run all enabled heuristics against one response
    pub fn scan(&self, response: &ResponseData) -> Vec<Vulnerability> {
        let mut findings = Vec::new();

        if self.toggles.size_delta {
            if let Some(finding) = self.check_size_delta(response) {
                findings.push(finding);
            }
        }
        if self.toggles.content_type {
            if let Some(finding) = check_content_type(response) {
                findings.push(finding);
            }
        }
        if self.toggles.stacktrace {
            if let Some(finding) = check_stacktrace(response) {
                findings.push(finding);
            }
        }

        findings
    }

    /// Per-path EWMA body-length baseline, compared before updating.
    /// The first sighting of a path seeds its baseline silently.
    fn check_size_delta(&self, response: &ResponseData) -> Option<Vulnerability> {
        let path = Url::parse(&response.url).ok()?.path().to_string();
        let current = response.body.len() as f64;

        let mut baselines = self.baselines.lock();
        let Some(&baseline) = baselines.get(&path) else {
            baselines.put(path, current);
            return None;
        };

        let delta = (current - baseline).abs() / baseline.max(1.0);
        baselines.put(path, EWMA_KEEP * baseline + EWMA_MIX * current);
        drop(baselines);

        if delta < SIZE_DELTA_THRESHOLD {
            return None;
        }

        Some(
            Vulnerability::new(
                IssueKind::SizeAnomaly,
                Severity::Informational,
                &response.url,
                "Response size deviates sharply from this path's baseline",
            )
            .with_evidence(&format!(
                "current {} bytes vs baseline {:.0} bytes ({:.0}% delta)",
                current as u64,
                baseline,
                delta * 100.0
            ))
            .with_confidence(0.6),
        )
    }
}

/// Declared Content-Type vs what the body structurally looks like
fn check_content_type(response: &ResponseData) -> Option<Vulnerability> {
    let body_kind = classify_body(&response.body);
    if body_kind == ContentKind::Other || body_kind == ContentKind::Blank {
        return None;
    }

    let declared = classify_declared(response.content_type.as_deref());

    let mismatch = match declared {
        ContentKind::Html | ContentKind::Json | ContentKind::Xml => declared != body_kind,
        // A blank declared type with an apparent JSON/XML body is
        // suspicious; HTML is what servers default to.
        ContentKind::Blank => matches!(body_kind, ContentKind::Json | ContentKind::Xml),
        // Concrete but unclassified declarations (text/plain and
        // friends) carrying structured bodies are the classic
        // misconfiguration.
        ContentKind::Other => true,
    };

    if !mismatch {
        return None;
    }

    Some(
        Vulnerability::new(
            IssueKind::ContentTypeMismatch,
            Severity::Informational,
            &response.url,
            "Declared Content-Type disagrees with the body's structure",
        )
        .with_evidence(&format!(
            "declared '{}', body looks like {:?}",
            response.content_type.as_deref().unwrap_or("(blank)"),
            body_kind
        ))
        .with_confidence(0.65),
    )
}

/// Classify the first bounded run of non-whitespace body content
fn classify_body(body: &str) -> ContentKind {
    let trimmed = body.trim_start();
    if trimmed.is_empty() {
        return ContentKind::Blank;
    }
    let window_end = floor_char_boundary(trimmed, CLASSIFY_WINDOW.min(trimmed.len()));
    let window = &trimmed[..window_end];
    let lower = window.to_ascii_lowercase();

    if lower.starts_with('{') || lower.starts_with('[') {
        return ContentKind::Json;
    }
    if lower.starts_with("<?xml") {
        return ContentKind::Xml;
    }
    if lower.starts_with('<') {
        const HTML_CUES: &[&str] = &[
            "<!doctype html",
            "<html",
            "<head",
            "<body",
            "<div",
            "<span",
            "<p>",
            "<br",
            "<script",
            "<meta",
            "<title",
            "<form",
            "<table",
        ];
        if HTML_CUES.iter().any(|cue| lower.contains(cue)) {
            return ContentKind::Html;
        }
        // Tag-opening content with no HTML cue reads as XML.
        return ContentKind::Xml;
    }
    ContentKind::Other
}

fn classify_declared(content_type: Option<&str>) -> ContentKind {
    let Some(content_type) = content_type else {
        return ContentKind::Blank;
    };
    let lower = content_type.to_ascii_lowercase();
    if lower.trim().is_empty() {
        ContentKind::Blank
    } else if lower.contains("html") {
        ContentKind::Html
    } else if lower.contains("json") {
        ContentKind::Json
    } else if lower.contains("xml") {
        ContentKind::Xml
    } else {
        ContentKind::Other
    }
}

/// One compiled pattern over cross-runtime stack-trace and framework
/// error markers; the first match wins.
fn check_stacktrace(response: &ResponseData) -> Option<Vulnerability> {
    let matched = STACKTRACE_RE.find(&response.body)?;

    let start = floor_char_boundary(&response.body, matched.start().saturating_sub(SNIPPET_RADIUS));
    let end = floor_char_boundary(
        &response.body,
        (matched.end() + SNIPPET_RADIUS).min(response.body.len()),
    );
    let snippet = super::active::mask_sensitive(&response.body[start..end]);

    Some(
        Vulnerability::new(
            IssueKind::StacktraceLeak,
            Severity::Informational,
            &response.url,
            "Response body contains a stack trace or framework error",
        )
        .with_evidence(matched.as_str())
        .with_confidence(0.7)
        .with_snippet(&snippet),
    )
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str, content_type: Option<&str>) -> ResponseData {
        let headers = content_type
            .map(|ct| vec![("Content-Type".to_string(), ct.to_string())])
            .unwrap_or_default();
        ResponseData::new("https://example.com/page", 200, headers, body, 5)
    }

    fn response_at(url: &str, body: &str) -> ResponseData {
        ResponseData::new(url, 200, Vec::<(String, String)>::new(), body, 5)
    }

    fn engine(size_delta: bool) -> AnomalyEngine {
        AnomalyEngine::new(AnomalyToggles {
            size_delta,
            ..Default::default()
        })
    }

    #[test]
    fn first_sighting_seeds_baseline_silently() {
        let engine = engine(true);
        let findings = engine.scan(&response_at("https://example.com/a", &"x".repeat(1000)));
        assert!(findings.is_empty());
    }

    #[test]
    fn large_delta_triggers_against_pre_update_baseline() {
        let engine = engine(true);
        let url = "https://example.com/a";

        assert!(engine.scan(&response_at(url, &"x".repeat(1000))).is_empty());
        // 1300 bytes vs baseline 1000: 30% >= 25%.
        let findings = engine.scan(&response_at(url, &"x".repeat(1300)));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, IssueKind::SizeAnomaly);
        assert_eq!(findings[0].severity, Severity::Informational);
    }

    #[test]
    fn small_delta_stays_quiet_and_updates_ewma() {
        let engine = engine(true);
        let url = "https://example.com/a";

        assert!(engine.scan(&response_at(url, &"x".repeat(1000))).is_empty());
        assert!(engine.scan(&response_at(url, &"x".repeat(1100))).is_empty());
        // Baseline moved to 0.7*1000 + 0.3*1100 = 1030; 1300 is ~26%.
        let findings = engine.scan(&response_at(url, &"x".repeat(1300)));
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn baselines_are_per_path() {
        let engine = engine(true);
        assert!(engine
            .scan(&response_at("https://example.com/a", &"x".repeat(100)))
            .is_empty());
        // Different path: fresh baseline, no finding.
        assert!(engine
            .scan(&response_at("https://example.com/b", &"x".repeat(5000)))
            .is_empty());
    }

    #[test]
    fn content_type_mismatch_cases() {
        let engine = engine(false);

        // JSON body declared as HTML.
        let findings = engine.scan(&response(r#"{"ok":true}"#, Some("text/html")));
        assert!(findings
            .iter()
            .any(|f| f.kind == IssueKind::ContentTypeMismatch));

        // Blank declaration with a JSON body.
        let findings = engine.scan(&response(r#"{"ok":true}"#, None));
        assert!(findings
            .iter()
            .any(|f| f.kind == IssueKind::ContentTypeMismatch));

        // Blank declaration with an HTML body: servers default to HTML.
        let findings = engine.scan(&response("<html><body>hi</body></html>", None));
        assert!(findings.is_empty());

        // HTML declared as text/plain.
        let findings = engine.scan(&response(
            "<!DOCTYPE html><html></html>",
            Some("text/plain"),
        ));
        assert!(findings
            .iter()
            .any(|f| f.kind == IssueKind::ContentTypeMismatch));

        // Agreement is quiet.
        let findings = engine.scan(&response(
            "<!DOCTYPE html><html></html>",
            Some("text/html; charset=utf-8"),
        ));
        assert!(findings.is_empty());

        let findings = engine.scan(&response(r#"{"a":1}"#, Some("application/json")));
        assert!(findings.is_empty());
    }

    #[test]
    fn xml_body_classification() {
        assert_eq!(classify_body("<?xml version=\"1.0\"?><a/>"), ContentKind::Xml);
        assert_eq!(classify_body("<feed xmlns=\"...\"></feed>"), ContentKind::Xml);
        assert_eq!(classify_body("<!DOCTYPE html><html>"), ContentKind::Html);
        assert_eq!(classify_body("  \n\t{\"a\":1}"), ContentKind::Json);
        assert_eq!(classify_body("plain words"), ContentKind::Other);
        assert_eq!(classify_body("   "), ContentKind::Blank);
    }

    #[test]
    fn stacktrace_markers_across_runtimes() {
        let engine = engine(false);
        let bodies = [
            "Traceback (most recent call last):\n  File \"app.py\", line 3",
            "Exception in thread \"main\" java.lang.NullPointerException",
            "Fatal error: Uncaught Error: Call to undefined function",
            "System.NullReferenceException: Object reference not set",
            "goroutine 17 [running]:\nmain.handler()",
            "ORA-00933: SQL command not properly ended",
        ];
        for body in bodies {
            let findings = engine.scan(&response(body, Some("text/plain")));
            assert!(
                findings.iter().any(|f| f.kind == IssueKind::StacktraceLeak),
                "missed marker in: {body}"
            );
        }
    }

    #[test]
    fn stacktrace_finding_carries_a_centered_snippet() {
        let engine = engine(false);
        let body = format!(
            "{}Stack trace: #0 /var/www/index.php(12){}",
            "x".repeat(300),
            "y".repeat(300)
        );
        let findings = engine.scan(&response(&body, Some("text/html")));
        let finding = findings
            .iter()
            .find(|f| f.kind == IssueKind::StacktraceLeak)
            .unwrap();
        let snippet = finding.snippet.as_deref().unwrap();
        assert!(snippet.contains("Stack trace:"));
        assert!(snippet.len() < body.len());
    }

    #[test]
    fn clean_response_yields_nothing() {
        let engine = engine(false);
        let findings = engine.scan(&response(
            "<!DOCTYPE html><html><body>hello</body></html>",
            Some("text/html"),
        ));
        assert!(findings.is_empty());
    }
}
