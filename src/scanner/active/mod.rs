//! Active probe engine
//!
//! Executes declarative probe plans against live targets using
//! read-only-safe methods only (GET/HEAD/OPTIONS); a probe never
//! mutates server state. Each plan is isolated: a failure aborts only
//! that plan's contribution.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use url::Url;

use crate::config::ScanConfig;
use crate::error::HttpError;

use super::findings::{IssueKind, Severity, Vulnerability};
use super::limits::{BudgetGate, RateLimiter};
use super::stats::ScanStats;

/// Evidence snippets are clipped to this many characters around the match.
const SNIPPET_RADIUS: usize = 80;

/// Vendor SQL error signatures, matched case-insensitively
const SQL_ERROR_SIGNATURES: &[&str] = &[
    "you have an error in your sql syntax",
    "warning: mysql",
    "mysql_fetch",
    "unclosed quotation mark after the character string",
    "quoted string not properly terminated",
    "sqlstate[",
    "pg_query(): query failed",
    "syntax error at or near",
    "ora-00933",
    "ora-01756",
    "sqlite3::exception",
    "sqlite_error",
    "odbc sql server driver",
    "microsoft ole db provider for sql server",
    "db2 sql error",
];

/// Template engine error signatures for SSTI, matched case-insensitively
const TEMPLATE_ERROR_SIGNATURES: &[&str] = &[
    "jinja2.exceptions",
    "twig\\error",
    "smarty error",
    "freemarker.template",
    "org.apache.velocity",
    "liquid error",
    "template syntax error",
    "mako.exceptions",
];

/// Local file inclusion signatures: Unix password-file line marker and
/// Windows configuration-section markers
const LFI_UNIX_SIGNATURE: &str = "root:x:0:0:";
const LFI_WINDOWS_SIGNATURES: &[&str] = &["[fonts]", "[extensions]"];

static PASSWD_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Za-z0-9_-]+):[^:\n]*:\d+:\d+:[^\n]*$").unwrap());

static SECRET_ASSIGNMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(api_key|apikey|secret|token|password|passwd|pwd|key)\s*[=:]\s*[^\s&"'<>]+"#)
        .unwrap()
});

/// What a plan targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanKind {
    /// Inject into one query parameter
    Param { name: String },
    /// Manipulate request headers (CORS)
    Header,
    /// Inspect the page itself (mixed content)
    Page,
}

/// Declarative description of one active-probe interaction
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub kind: PlanKind,
    pub issue: IssueKind,
    pub payload: String,
    /// Unique token tying evidence back to this plan
    pub marker: String,
}

impl ProbePlan {
    /// Parameter-injection plan for one issue category
    pub fn param(issue: IssueKind, name: &str) -> Self {
        let marker = random_marker();
        let payload = match issue {
            IssueKind::XssReflected => format!("<stx{marker}>"),
            IssueKind::SqliError => "'\"".to_string(),
            IssueKind::OpenRedirect => format!("https://{marker}.invalid/"),
            IssueKind::PathTraversal => "../../../../../../etc/passwd".to_string(),
            IssueKind::Ssti => "{{1337*1337}}".to_string(),
            _ => String::new(),
        };
        Self {
            kind: PlanKind::Param {
                name: name.to_string(),
            },
            issue,
            payload,
            marker,
        }
    }

    /// CORS header plan
    pub fn header(issue: IssueKind) -> Self {
        let marker = random_marker();
        Self {
            kind: PlanKind::Header,
            issue,
            payload: format!("https://{marker}.invalid"),
            marker,
        }
    }

    /// Page-inspection plan
    pub fn page(issue: IssueKind) -> Self {
        Self {
            kind: PlanKind::Page,
            issue,
            payload: String::new(),
            marker: random_marker(),
        }
    }
}

fn random_marker() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Executes probe plans and classifies responses into findings
pub struct ProbeEngine {
    client: reqwest::Client,
    budget: Arc<BudgetGate>,
    limiter: Arc<RateLimiter>,
    stats: Arc<ScanStats>,
}

impl ProbeEngine {
    pub fn new(
        config: &ScanConfig,
        budget: Arc<BudgetGate>,
        limiter: Arc<RateLimiter>,
        stats: Arc<ScanStats>,
    ) -> Result<Self, HttpError> {
        // Probes always observe raw responses; redirect classification
        // depends on seeing the 3xx itself.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| HttpError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            budget,
            limiter,
            stats,
        })
    }

    /// Execute all plans for one URL. Stops issuing new plans once the
    /// budget gate refuses; in-flight work is never aborted.
    pub async fn execute(&self, url: &str, plans: Vec<ProbePlan>) -> Vec<Vulnerability> {
        let mut findings = Vec::new();
        let mut cors_confirmed = false;

        for plan in plans {
            if plan.issue == IssueKind::CorsMisconfig && cors_confirmed {
                continue;
            }
            if !self.budget.try_consume() {
                tracing::debug!(url, "probe budget exhausted");
                break;
            }

            self.limiter.acquire().await;
            self.stats.record_attempt();

            match self.run_plan(url, &plan).await {
                Ok(Some(finding)) => {
                    if finding.kind == IssueKind::CorsMisconfig {
                        // First confirmed CORS finding wins for this URL.
                        cors_confirmed = true;
                    }
                    findings.push(finding);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(url, issue = ?plan.issue, error = %err, "probe failed");
                }
            }
        }

        findings
    }

    async fn run_plan(&self, url: &str, plan: &ProbePlan) -> Result<Option<Vulnerability>> {
        match &plan.kind {
            PlanKind::Param { name } => self.run_param_plan(url, name, plan).await,
            PlanKind::Header => self.run_cors_plan(url, plan).await,
            PlanKind::Page => self.run_page_plan(url, plan).await,
        }
    }

    async fn run_param_plan(
        &self,
        url: &str,
        param: &str,
        plan: &ProbePlan,
    ) -> Result<Option<Vulnerability>> {
        let test_url = inject_param(url, param, &plan.payload)?;
        let request_line = request_line_of(&test_url, "GET");

        let response = self.client.get(test_url.as_str()).send().await?;
        let status = response.status().as_u16() as i32;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await.unwrap_or_default();

        let confirmed = match plan.issue {
            IssueKind::OpenRedirect => {
                classify_open_redirect(url, status, location.as_deref()).map(|evidence| {
                    (
                        Severity::Medium,
                        0.9,
                        format!("Parameter '{param}' redirects to an attacker-controlled host"),
                        evidence,
                    )
                })
            }
            IssueKind::XssReflected => classify_xss(&body, &plan.marker).map(|evidence| {
                (
                    Severity::High,
                    0.9,
                    format!("Parameter '{param}' is reflected without HTML encoding"),
                    evidence,
                )
            }),
            IssueKind::SqliError => classify_sql_error(&body).map(|evidence| {
                (
                    Severity::High,
                    0.85,
                    format!("Parameter '{param}' triggers a database error"),
                    evidence,
                )
            }),
            IssueKind::PathTraversal => classify_path_traversal(&body).map(|evidence| {
                (
                    Severity::High,
                    0.95,
                    format!("Parameter '{param}' leaks local file content"),
                    evidence,
                )
            }),
            IssueKind::Ssti => classify_ssti(&body).map(|evidence| {
                (
                    Severity::High,
                    0.9,
                    format!("Parameter '{param}' is evaluated by a server-side template engine"),
                    evidence,
                )
            }),
            _ => None,
        };

        Ok(confirmed.map(|(severity, confidence, description, evidence)| {
            let snippet = snippet_around(&body, &evidence)
                .or_else(|| location.clone())
                .unwrap_or_default();
            Vulnerability::new(plan.issue, severity, url, &description)
                .with_evidence(&evidence)
                .with_confidence(confidence)
                .with_request_line(&request_line)
                .with_snippet(&mask_sensitive(&snippet))
        }))
    }

    async fn run_cors_plan(&self, url: &str, plan: &ProbePlan) -> Result<Option<Vulnerability>> {
        let origin = plan.payload.as_str();
        let response = self
            .client
            .request(reqwest::Method::OPTIONS, url)
            .header("Origin", origin)
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let allow_origin = header("access-control-allow-origin");
        let allow_credentials = header("access-control-allow-credentials");

        let Some(evidence) =
            classify_cors(origin, allow_origin.as_deref(), allow_credentials.as_deref())
        else {
            return Ok(None);
        };

        Ok(Some(
            Vulnerability::new(
                IssueKind::CorsMisconfig,
                Severity::High,
                url,
                "Credentialed cross-origin access is granted to untrusted origins",
            )
            .with_evidence(&evidence)
            .with_confidence(0.95)
            .with_request_line(&request_line_of(&Url::parse(url)?, "OPTIONS"))
            .with_snippet(&evidence),
        ))
    }

    async fn run_page_plan(&self, url: &str, plan: &ProbePlan) -> Result<Option<Vulnerability>> {
        if plan.issue != IssueKind::MixedContent || !url.starts_with("https://") {
            return Ok(None);
        }

        let response = self.client.get(url).send().await?;
        let body = response.text().await.unwrap_or_default();

        let Some(evidence) = classify_mixed_content(&body) else {
            return Ok(None);
        };

        let snippet = snippet_around(&body, &evidence).unwrap_or_default();
        Ok(Some(
            Vulnerability::new(
                IssueKind::MixedContent,
                Severity::Low,
                url,
                "HTTPS page references plain-HTTP resources",
            )
            .with_evidence(&evidence)
            .with_confidence(0.8)
            .with_request_line(&request_line_of(&Url::parse(url)?, "GET"))
            .with_snippet(&mask_sensitive(&snippet)),
        ))
    }
}

/// Replace (or add) one query parameter's value
fn inject_param(url: &str, param: &str, payload: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    let mut test_url = parsed.clone();
    let existing: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    {
        let mut pairs = test_url.query_pairs_mut();
        pairs.clear();
        let mut replaced = false;
        for (key, value) in &existing {
            if key == param {
                pairs.append_pair(key, payload);
                replaced = true;
            } else {
                pairs.append_pair(key, value);
            }
        }
        if !replaced {
            pairs.append_pair(param, payload);
        }
    }

    Ok(test_url)
}

/// `GET /path?query HTTP/1.1` form for evidence records
fn request_line_of(url: &Url, method: &str) -> String {
    match url.query() {
        Some(query) => format!("{} {}?{} HTTP/1.1", method, url.path(), query),
        None => format!("{} {} HTTP/1.1", method, url.path()),
    }
}

/// Open redirect: a raw 3xx whose Location host differs from the
/// target's, compared case-insensitively.
fn classify_open_redirect(target: &str, status: i32, location: Option<&str>) -> Option<String> {
    if !(300..400).contains(&status) {
        return None;
    }
    let location = location?;
    let target_host = Url::parse(target).ok()?.host_str()?.to_ascii_lowercase();
    let location_host = Url::parse(location).ok()?.host_str()?.to_ascii_lowercase();
    (location_host != target_host).then(|| format!("Location: {location}"))
}

/// Reflected XSS: the unique marker came back inside an unescaped
/// tag-opening fragment.
fn classify_xss(body: &str, marker: &str) -> Option<String> {
    let fragment = format!("<stx{marker}");
    (body.contains(marker) && body.contains(&fragment)).then(|| fragment)
}

fn classify_sql_error(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    SQL_ERROR_SIGNATURES
        .iter()
        .find(|signature| lower.contains(*signature))
        .map(|signature| signature.to_string())
}

fn classify_path_traversal(body: &str) -> Option<String> {
    if body.contains(LFI_UNIX_SIGNATURE) {
        return Some(LFI_UNIX_SIGNATURE.to_string());
    }
    let lower = body.to_ascii_lowercase();
    LFI_WINDOWS_SIGNATURES
        .iter()
        .find(|signature| lower.contains(*signature))
        .map(|signature| signature.to_string())
}

/// SSTI: the arithmetic marker proves evaluation, or a template engine
/// error leaked.
fn classify_ssti(body: &str) -> Option<String> {
    if body.contains("1787569") && !body.contains("{{1337*1337}}") {
        return Some("1337*1337 evaluated to 1787569".to_string());
    }
    let lower = body.to_ascii_lowercase();
    TEMPLATE_ERROR_SIGNATURES
        .iter()
        .find(|signature| lower.contains(*signature))
        .map(|signature| signature.to_string())
}

/// CORS: credentials allowed together with a wildcard, echoed, or null
/// origin.
fn classify_cors(
    sent_origin: &str,
    allow_origin: Option<&str>,
    allow_credentials: Option<&str>,
) -> Option<String> {
    let credentials = allow_credentials?.trim().eq_ignore_ascii_case("true");
    if !credentials {
        return None;
    }
    let allow_origin = allow_origin?.trim();
    let permissive = allow_origin == "*"
        || allow_origin.eq_ignore_ascii_case("null")
        || allow_origin.eq_ignore_ascii_case(sent_origin);
    permissive.then(|| {
        format!(
            "Access-Control-Allow-Origin: {allow_origin}, Access-Control-Allow-Credentials: true"
        )
    })
}

/// Mixed content: any `http://` reference in an https page body, bare
/// or inside src/href/data/action attributes.
fn classify_mixed_content(body: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with the original.
    let lower = body.to_ascii_lowercase();
    let index = lower.find("http://")?;
    let end = (index + 60).min(body.len());
    let end = floor_char_boundary(body, end);
    Some(body[index..end].to_string())
}

/// Bounded context snippet centered on the first occurrence of the
/// evidence within the body.
fn snippet_around(body: &str, evidence: &str) -> Option<String> {
    let index = body.find(evidence)?;
    let start = floor_char_boundary(body, index.saturating_sub(SNIPPET_RADIUS));
    let end = floor_char_boundary(body, (index + evidence.len() + SNIPPET_RADIUS).min(body.len()));
    Some(body[start..end].to_string())
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Mask sensitive-looking substrings before they land in evidence:
/// password-file lines and key/secret/token-style assignments.
pub fn mask_sensitive(snippet: &str) -> String {
    let masked = PASSWD_LINE_RE.replace_all(snippet, "$1:*****");
    SECRET_ASSIGNMENT_RE
        .replace_all(&masked, "$1=*****")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_redirect_requires_3xx_and_foreign_host() {
        assert!(classify_open_redirect(
            "https://example.com/go",
            302,
            Some("https://EVIL.example.net/")
        )
        .is_some());
        // Same host, case-insensitively: not a finding.
        assert!(classify_open_redirect(
            "https://example.com/go",
            301,
            Some("https://EXAMPLE.COM/home")
        )
        .is_none());
        assert!(classify_open_redirect("https://example.com/go", 200, Some("https://x.y/")).is_none());
        assert!(classify_open_redirect("https://example.com/go", 302, None).is_none());
    }

    #[test]
    fn xss_requires_unescaped_reflection() {
        let marker = "abcd1234";
        assert!(classify_xss("<p>before <stxabcd1234> after</p>", marker).is_some());
        // HTML-encoded reflection keeps the marker but loses the tag open.
        assert!(classify_xss("&lt;stxabcd1234&gt;", marker).is_none());
        assert!(classify_xss("no reflection at all", marker).is_none());
    }

    #[test]
    fn sql_signatures_match_case_insensitively() {
        assert!(classify_sql_error("You have an error in your SQL syntax near ''").is_some());
        assert!(classify_sql_error("ORA-00933: SQL command not properly ended").is_some());
        assert!(classify_sql_error("perfectly healthy page").is_none());
    }

    #[test]
    fn path_traversal_signatures() {
        assert!(classify_path_traversal("root:x:0:0:root:/root:/bin/bash").is_some());
        assert!(classify_path_traversal("; for 16-bit app support\n[FONTS]\n").is_some());
        assert!(classify_path_traversal("just text").is_none());
    }

    #[test]
    fn ssti_numeric_marker_and_error_signatures() {
        assert!(classify_ssti("result: 1787569").is_some());
        // The raw template echoed back unevaluated is not a finding.
        assert!(classify_ssti("you searched for {{1337*1337}}").is_none());
        assert!(classify_ssti("jinja2.exceptions.TemplateSyntaxError: unexpected").is_some());
        assert!(classify_ssti("plain").is_none());
    }

    #[test]
    fn cors_requires_credentials_plus_permissive_origin() {
        let origin = "https://probe.invalid";
        assert!(classify_cors(origin, Some("*"), Some("true")).is_some());
        assert!(classify_cors(origin, Some("null"), Some("true")).is_some());
        assert!(classify_cors(origin, Some(origin), Some("true")).is_some());
        assert!(classify_cors(origin, Some("https://trusted.example"), Some("true")).is_none());
        assert!(classify_cors(origin, Some("*"), Some("false")).is_none());
        assert!(classify_cors(origin, Some("*"), None).is_none());
        assert!(classify_cors(origin, None, Some("true")).is_none());
    }

    #[test]
    fn mixed_content_detects_bare_and_attribute_references() {
        assert!(classify_mixed_content(r#"<img src="http://cdn.example.com/a.png">"#).is_some());
        assert!(classify_mixed_content("see http://example.com/page").is_some());
        assert!(classify_mixed_content(r#"<a href="https://example.com/">safe</a>"#).is_none());
    }

    #[test]
    fn injection_replaces_existing_and_appends_missing() {
        let url = inject_param("https://example.com/s?q=hello&page=2", "q", "PAYLOAD").unwrap();
        assert!(url.as_str().contains("q=PAYLOAD"));
        assert!(url.as_str().contains("page=2"));

        let url = inject_param("https://example.com/s", "debug", "1").unwrap();
        assert!(url.as_str().contains("debug=1"));
    }

    #[test]
    fn request_line_includes_query() {
        let url = Url::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(request_line_of(&url, "GET"), "GET /a/b?x=1 HTTP/1.1");
        let url = Url::parse("https://example.com/a").unwrap();
        assert_eq!(request_line_of(&url, "OPTIONS"), "OPTIONS /a HTTP/1.1");
    }

    #[test]
    fn masking_hides_passwd_lines_and_secret_assignments() {
        let masked = mask_sensitive("root:x:0:0:root:/root:/bin/bash");
        assert!(!masked.contains("/bin/bash"));
        assert!(masked.contains("root:*****"));

        let masked = mask_sensitive("config: api_key=sk-123456 other=ok");
        assert!(!masked.contains("sk-123456"));
        assert!(masked.contains("api_key=*****"));
        assert!(masked.contains("other=ok"));

        let masked = mask_sensitive("token: abc123&next=1");
        assert!(!masked.contains("abc123"));
    }

    #[test]
    fn snippet_is_bounded_and_centered() {
        let body = format!("{}NEEDLE{}", "a".repeat(500), "b".repeat(500));
        let snippet = snippet_around(&body, "NEEDLE").unwrap();
        assert!(snippet.contains("NEEDLE"));
        assert!(snippet.len() <= "NEEDLE".len() + 2 * SNIPPET_RADIUS);
    }

    #[test]
    fn param_plans_carry_category_payloads() {
        let plan = ProbePlan::param(IssueKind::XssReflected, "q");
        assert!(plan.payload.starts_with("<stx"));
        assert!(plan.payload.contains(&plan.marker));

        let plan = ProbePlan::param(IssueKind::Ssti, "q");
        assert_eq!(plan.payload, "{{1337*1337}}");

        let plan = ProbePlan::param(IssueKind::OpenRedirect, "next");
        assert!(plan.payload.contains(".invalid"));
    }
}
