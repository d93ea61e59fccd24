//! Vulnerability findings
//!
//! A finding is built once by whichever detector confirms it and never
//! mutated afterward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Severity::Informational => "Informational",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Base weight used for risk scoring
    fn weight(&self) -> f64 {
        match self {
            Severity::Informational => 10.0,
            Severity::Low => 25.0,
            Severity::Medium => 50.0,
            Severity::High => 80.0,
            Severity::Critical => 100.0,
        }
    }
}

/// Vulnerability classes the detectors can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    XssReflected,
    SqliError,
    CorsMisconfig,
    OpenRedirect,
    PathTraversal,
    Ssti,
    MixedContent,
    SizeAnomaly,
    ContentTypeMismatch,
    StacktraceLeak,
}

impl IssueKind {
    pub fn name(&self) -> &'static str {
        match self {
            IssueKind::XssReflected => "Reflected Cross-Site Scripting",
            IssueKind::SqliError => "Error-Based SQL Injection",
            IssueKind::CorsMisconfig => "CORS Misconfiguration",
            IssueKind::OpenRedirect => "Open Redirect",
            IssueKind::PathTraversal => "Path Traversal",
            IssueKind::Ssti => "Server-Side Template Injection",
            IssueKind::MixedContent => "Mixed Content",
            IssueKind::SizeAnomaly => "Response Size Anomaly",
            IssueKind::ContentTypeMismatch => "Content-Type Mismatch",
            IssueKind::StacktraceLeak => "Stack Trace Disclosure",
        }
    }
}

/// A confirmed security finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Unique ID
    pub id: String,

    /// URL the finding applies to
    pub url: String,

    /// Vulnerability class
    pub kind: IssueKind,

    /// Severity level
    pub severity: Severity,

    /// Human-readable description
    pub description: String,

    /// Raw evidence string
    pub evidence: String,

    /// Confidence level (0.0 - 1.0)
    pub confidence: f64,

    /// Detection timestamp
    pub detected_at: DateTime<Utc>,

    /// Risk score (0 - 100), severity weighted by confidence
    pub risk_score: Option<u8>,

    /// Synthesized request line that triggered the finding
    pub request_line: Option<String>,

    /// Bounded context snippet around the matched evidence
    pub snippet: Option<String>,
}

impl Vulnerability {
    pub fn new(kind: IssueKind, severity: Severity, url: &str, description: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            kind,
            severity,
            description: description.to_string(),
            evidence: String::new(),
            confidence: 1.0,
            detected_at: Utc::now(),
            risk_score: Some(severity.weight() as u8),
            request_line: None,
            snippet: None,
        }
    }

    pub fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence = evidence.to_string();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self.risk_score = Some((self.severity.weight() * self.confidence) as u8);
        self
    }

    pub fn with_request_line(mut self, request_line: &str) -> Self {
        self.request_line = Some(request_line.to_string());
        self
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = Some(snippet.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_score_follows_severity_and_confidence() {
        let finding = Vulnerability::new(
            IssueKind::SqliError,
            Severity::High,
            "https://example.com/",
            "test",
        );
        assert_eq!(finding.risk_score, Some(80));

        let finding = finding.with_confidence(0.5);
        assert_eq!(finding.risk_score, Some(40));
    }

    #[test]
    fn confidence_is_clamped() {
        let finding = Vulnerability::new(
            IssueKind::Ssti,
            Severity::Medium,
            "https://example.com/",
            "test",
        )
        .with_confidence(7.0);
        assert_eq!(finding.confidence, 1.0);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Informational);
    }
}
