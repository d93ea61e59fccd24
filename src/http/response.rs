//! Normalized HTTP response capture

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sentinel status meaning "no HTTP response obtained" (timeout,
/// connection refused, TLS failure). Callers treat it uniformly as a
/// retryable condition.
pub const STATUS_UNREACHABLE: i32 = -1;

/// Immutable capture of one HTTP exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    /// Requested URL
    pub url: String,

    /// HTTP status code, or [`STATUS_UNREACHABLE`]
    pub status: i32,

    /// Response headers; keys are lowercased, values keep arrival order
    pub headers: HashMap<String, Vec<String>>,

    /// Response body text
    pub body: String,

    /// Declared Content-Type, if any
    pub content_type: Option<String>,

    /// Wall time of the exchange in milliseconds
    pub elapsed_ms: u64,
}

impl ResponseData {
    /// Build a response record from raw parts. Header names are
    /// lowercased on insertion so lookups are case-insensitive.
    pub fn new(
        url: impl Into<String>,
        status: i32,
        header_pairs: impl IntoIterator<Item = (String, String)>,
        body: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in header_pairs {
            headers.entry(name.to_ascii_lowercase()).or_default().push(value);
        }
        let content_type = headers
            .get("content-type")
            .and_then(|values| values.first())
            .cloned();

        Self {
            url: url.into(),
            status,
            headers,
            body: body.into(),
            content_type,
            elapsed_ms,
        }
    }

    /// Record for a transport failure: sentinel status, empty body,
    /// elapsed time up to the failure.
    pub fn unreachable(url: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            url: url.into(),
            status: STATUS_UNREACHABLE,
            headers: HashMap::new(),
            body: String::new(),
            content_type: None,
            elapsed_ms,
        }
    }

    /// First value of a header, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(|v| v.as_str())
    }

    /// All values of a header, case-insensitively
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Check if the response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response is a redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Check if the response looks like HTML
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("html"))
            .unwrap_or(false)
    }
}
