//! Custom error types for Strix
//!
//! Only configuration validation errors are scan-fatal. Transport
//! failures are represented in-band as the unreachable status sentinel
//! and never surface here.

use thiserror::Error;

/// Main error type for Strix operations
#[derive(Error, Debug)]
pub enum StrixError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Scan errors
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Invalid exclusion rule '{rule}': {reason}")]
    InvalidExclusion { rule: String, reason: String },
}

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Scan errors
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan target: {0}")]
    InvalidTarget(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),
}
