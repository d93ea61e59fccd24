//! Per-URL detection pipeline
//!
//! analyze (with retry) → passive anomalies (always) → parameter
//! discovery, probe planning and execution (mode- and budget-gated).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::{ActiveConfig, Mode, ScanConfig};
use crate::error::HttpError;
use crate::http::{CountingRetryPolicy, DefaultRetryPolicy, HttpAnalyzer, TokioWaiter};

use super::active::{ProbeEngine, ProbePlan};
use super::coordinator::{UrlOutcome, UrlProcessor};
use super::features;
use super::findings::IssueKind;
use super::limits::{BudgetGate, RateLimiter};
use super::param_discovery::ParamDiscovery;
use super::passive::{AnomalyEngine, AnomalyToggles};
use super::stats::ScanStats;

/// Param-kind probe categories, in planning order
const PARAM_CATEGORIES: &[IssueKind] = &[
    IssueKind::XssReflected,
    IssueKind::SqliError,
    IssueKind::OpenRedirect,
    IssueKind::PathTraversal,
    IssueKind::Ssti,
];

/// Production per-URL pipeline
pub struct DetectorOrchestrator {
    analyzer: Arc<HttpAnalyzer>,
    anomalies: AnomalyEngine,
    probes: ProbeEngine,
    params: ParamDiscovery,
    mode: Mode,
    active: ActiveConfig,
    budget: Arc<BudgetGate>,
    max_params_per_url: usize,
    endpoint_cap: usize,
    endpoints_probed: AtomicUsize,
    waiter: TokioWaiter,
}

impl DetectorOrchestrator {
    pub fn new(
        config: &ScanConfig,
        analyzer: Arc<HttpAnalyzer>,
        budget: Arc<BudgetGate>,
        stats: Arc<ScanStats>,
    ) -> Result<Self, HttpError> {
        let defaults = features::defaults(config.mode);

        // Probes run under their own, mode-clamped rate limiter; the
        // coordinator's limiter keeps governing analysis requests.
        let probe_rate = features::probe_rps(config.mode, config.requests_per_second);
        let probe_limiter = Arc::new(RateLimiter::new(1, probe_rate.max(0.1)));
        let probes = ProbeEngine::new(config, Arc::clone(&budget), probe_limiter, stats)?;

        let toggles = AnomalyToggles {
            size_delta: config.active.size_delta_anomaly,
            ..Default::default()
        };

        let max_params_per_url = if config.max_params_per_url > 0 {
            config.max_params_per_url
        } else {
            defaults.max_params_per_url
        };

        Ok(Self {
            analyzer,
            anomalies: AnomalyEngine::new(toggles),
            probes,
            params: ParamDiscovery::new(&config.param_hints),
            mode: config.mode,
            active: config.active.clone(),
            budget,
            max_params_per_url,
            endpoint_cap: defaults.endpoint_cap,
            endpoints_probed: AtomicUsize::new(0),
            waiter: TokioWaiter,
        })
    }

    /// Whether the mode's matrix and the per-category config flag both
    /// enable a category
    fn category_enabled(&self, kind: IssueKind) -> bool {
        if !features::is_category_active(self.mode, kind) {
            return false;
        }
        match kind {
            IssueKind::XssReflected => self.active.xss,
            IssueKind::SqliError => self.active.sqli,
            IssueKind::CorsMisconfig => self.active.cors,
            IssueKind::OpenRedirect => self.active.open_redirect,
            IssueKind::PathTraversal => self.active.path_traversal,
            IssueKind::Ssti => self.active.ssti,
            IssueKind::MixedContent => self.active.mixed_content,
            _ => false,
        }
    }

    fn build_plans(&self, url: &str, candidates: &[String]) -> Vec<ProbePlan> {
        let mut plans = Vec::new();

        for name in candidates.iter().take(self.max_params_per_url) {
            for &kind in PARAM_CATEGORIES {
                if self.category_enabled(kind) {
                    plans.push(ProbePlan::param(kind, name));
                }
            }
        }

        if self.category_enabled(IssueKind::CorsMisconfig) {
            plans.push(ProbePlan::header(IssueKind::CorsMisconfig));
        }
        if self.category_enabled(IssueKind::MixedContent) && url.starts_with("https://") {
            plans.push(ProbePlan::page(IssueKind::MixedContent));
        }

        plans
    }

    /// Claim one of the mode's active-probe endpoint slots
    fn claim_endpoint_slot(&self) -> bool {
        self.endpoints_probed.fetch_add(1, Ordering::SeqCst) < self.endpoint_cap
    }
}

#[async_trait]
impl UrlProcessor for DetectorOrchestrator {
    async fn process(&self, url: &str) -> UrlOutcome {
        let start = Instant::now();

        let policy = CountingRetryPolicy::new(DefaultRetryPolicy::default());
        let response = self
            .analyzer
            .analyze_with_retry(url, &policy, &self.waiter)
            .await;
        let retries = policy.granted();

        let mut findings = self.anomalies.scan(&response);

        if features::is_any_active(self.mode)
            && self.budget.is_open()
            && self.claim_endpoint_slot()
        {
            let candidates = self.params.discover(url, &response.body);
            let plans = self.build_plans(url, &candidates);
            if !plans.is_empty() {
                tracing::debug!(url, plans = plans.len(), "executing probe plans");
                findings.extend(self.probes.execute(url, plans).await);
            }
        }

        UrlOutcome {
            findings,
            attempts: 1 + retries,
            retries,
            wall_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn orchestrator(mode: Mode) -> DetectorOrchestrator {
        let config = ScanConfig {
            target: "https://example.com/".into(),
            mode,
            ..Default::default()
        };
        let analyzer = Arc::new(HttpAnalyzer::new(&config).unwrap());
        let budget = Arc::new(BudgetGate::new(100, Duration::from_secs(60)));
        let stats = Arc::new(ScanStats::default());
        DetectorOrchestrator::new(&config, analyzer, budget, stats).unwrap()
    }

    #[test]
    fn safe_mode_enables_no_categories() {
        let orchestrator = orchestrator(Mode::Safe);
        for kind in [
            IssueKind::XssReflected,
            IssueKind::SqliError,
            IssueKind::CorsMisconfig,
            IssueKind::MixedContent,
        ] {
            assert!(!orchestrator.category_enabled(kind));
        }
    }

    #[test]
    fn config_flags_intersect_the_mode_matrix() {
        let mut config = ScanConfig {
            target: "https://example.com/".into(),
            mode: Mode::Aggressive,
            ..Default::default()
        };
        config.active.sqli = false;

        let analyzer = Arc::new(HttpAnalyzer::new(&config).unwrap());
        let budget = Arc::new(BudgetGate::new(100, Duration::from_secs(60)));
        let stats = Arc::new(ScanStats::default());
        let orchestrator =
            DetectorOrchestrator::new(&config, analyzer, budget, stats).unwrap();

        assert!(!orchestrator.category_enabled(IssueKind::SqliError));
        assert!(orchestrator.category_enabled(IssueKind::XssReflected));
    }

    #[test]
    fn plans_cover_categories_per_candidate_with_param_cap() {
        let orchestrator = orchestrator(Mode::SafePlus);
        let candidates: Vec<String> = (0..20).map(|i| format!("p{i}")).collect();

        let plans = orchestrator.build_plans("https://example.com/x", &candidates);

        // SafePlus param categories: XSS, SQLi, open redirect. Plus one
        // CORS header plan; no mixed-content in SafePlus.
        let param_plans = plans
            .iter()
            .filter(|p| matches!(p.kind, super::super::active::PlanKind::Param { .. }))
            .count();
        assert_eq!(param_plans, orchestrator.max_params_per_url * 3);
        assert!(plans
            .iter()
            .any(|p| p.issue == IssueKind::CorsMisconfig));
        assert!(!plans.iter().any(|p| p.issue == IssueKind::MixedContent));
    }

    #[test]
    fn mixed_content_plan_only_for_https_targets() {
        let orchestrator = orchestrator(Mode::AggressiveLite);

        let https_plans = orchestrator.build_plans("https://example.com/x", &[]);
        assert!(https_plans
            .iter()
            .any(|p| p.issue == IssueKind::MixedContent));

        let http_plans = orchestrator.build_plans("http://example.com/x", &[]);
        assert!(!http_plans
            .iter()
            .any(|p| p.issue == IssueKind::MixedContent));
    }

    #[test]
    fn endpoint_slots_are_bounded() {
        let orchestrator = orchestrator(Mode::SafePlus);
        let cap = orchestrator.endpoint_cap;
        for _ in 0..cap {
            assert!(orchestrator.claim_endpoint_slot());
        }
        assert!(!orchestrator.claim_endpoint_slot());
    }
}
