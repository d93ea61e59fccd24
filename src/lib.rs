//! Strix - policy-governed web vulnerability scanner
//!
//! Crawls a target site breadth-first under robots and exclusion policy,
//! analyzes each discovered page over HTTP with bounded retries, and runs
//! passive anomaly heuristics plus mode-gated active probes against it.
//! The result of a run is a merged list of findings and a telemetry
//! snapshot, handed to an external reporting layer.

pub mod config;
pub mod error;
pub mod http;
pub mod reporting;
pub mod scanner;
pub mod spider;

pub use config::{Mode, ScanConfig};
pub use error::{ConfigError, HttpError, ScanError, StrixError};
pub use scanner::findings::{IssueKind, Severity, Vulnerability};
pub use scanner::stats::{ScanStats, StatsSnapshot};
