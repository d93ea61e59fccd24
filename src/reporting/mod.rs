//! Report generation
//!
//! Wraps a run's findings and telemetry snapshot in a machine-readable
//! JSON envelope. The scan core itself never serializes anything; this
//! is the external export layer.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Mode;
use crate::scanner::findings::{Severity, Vulnerability};
use crate::scanner::stats::StatsSnapshot;

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub target: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanner_version: String,
}

impl ReportMetadata {
    pub fn new(target: &str, mode: Mode, started_at: DateTime<Utc>) -> Self {
        Self {
            target: target.to_string(),
            mode: mode.as_str().to_string(),
            started_at,
            finished_at: Utc::now(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_findings: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_kind: HashMap<String, usize>,
    pub unique_urls: usize,
    /// Aggregate risk score (0-100)
    pub risk_score: u8,
}

impl ReportSummary {
    pub fn from_findings(findings: &[Vulnerability]) -> Self {
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut urls: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for finding in findings {
            *by_severity
                .entry(finding.severity.as_str().to_string())
                .or_insert(0) += 1;
            *by_kind.entry(finding.kind.name().to_string()).or_insert(0) += 1;
            urls.insert(finding.url.as_str());
        }

        Self {
            total_findings: findings.len(),
            by_severity,
            by_kind,
            unique_urls: urls.len(),
            risk_score: Self::aggregate_risk(findings),
        }
    }

    fn aggregate_risk(findings: &[Vulnerability]) -> u8 {
        let mut score: f64 = 0.0;
        for finding in findings {
            score += match finding.severity {
                Severity::Critical => 25.0,
                Severity::High => 15.0,
                Severity::Medium => 8.0,
                Severity::Low => 3.0,
                Severity::Informational => 1.0,
            };
        }
        score.min(100.0) as u8
    }
}

/// Complete scan report
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub findings: Vec<Vulnerability>,
    pub stats: StatsSnapshot,
}

impl ScanReport {
    pub fn new(
        metadata: ReportMetadata,
        findings: Vec<Vulnerability>,
        stats: StatsSnapshot,
    ) -> Self {
        Self {
            metadata,
            summary: ReportSummary::from_findings(&findings),
            findings,
            stats,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Report written");
        Ok(())
    }
}
