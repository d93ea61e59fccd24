//! Strix - policy-governed web vulnerability scanner
//!
//! Headless CLI: crawl a target, analyze every discovered page, emit
//! findings and telemetry as a JSON report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strix::config::{Mode, ScanConfig};
use strix::http::HttpAnalyzer;
use strix::reporting::{ReportMetadata, ScanReport};
use strix::scanner::{BudgetGate, DetectorOrchestrator, RateLimiter, ScanCoordinator, ScanStats};
use strix::spider::robots::{RobotsCache, SystemClock};
use strix::spider::url::ExclusionMatcher;
use strix::spider::{Crawler, HtmlLinkSource};

/// Policy-governed web vulnerability scanner
#[derive(Parser, Debug)]
#[command(name = "strix")]
#[command(author, version, about = "Policy-governed web vulnerability scanner", long_about = None)]
struct Cli {
    /// Target URL to scan
    #[arg(short, long, env = "STRIX_TARGET")]
    target: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "STRIX_CONFIG")]
    config: Option<String>,

    /// Operating mode
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Maximum crawl depth
    #[arg(short, long)]
    depth: Option<u32>,

    /// Maximum concurrent per-URL pipelines
    #[arg(long)]
    concurrency: Option<usize>,

    /// Outbound requests per second
    #[arg(long)]
    rps: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Exclusion rule (repeatable): `re:` regex, glob, or path substring
    #[arg(short, long = "exclude")]
    exclude: Vec<String>,

    /// Ignore robots.txt
    #[arg(long)]
    no_robots: bool,

    /// Follow links to other hosts
    #[arg(long)]
    include_offsite: bool,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "STRIX_LOG_LEVEL")]
    log_level: String,

    /// Enable JSON structured logging
    #[arg(long, env = "STRIX_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Strix");

    let config = load_config(&cli)?;
    config.validate().context("Invalid configuration")?;

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    run_scan(config, cli.output).await
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so stdout stays clean for the report.
    if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = ScanConfig::load(cli.config.as_deref())?;

    if let Some(target) = &cli.target {
        config.target = target.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(depth) = cli.depth {
        config.max_depth = depth;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(rps) = cli.rps {
        config.requests_per_second = rps;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if !cli.exclude.is_empty() {
        config.exclude_rules.extend(cli.exclude.iter().cloned());
    }
    if cli.no_robots {
        config.respect_robots = false;
    }
    if cli.include_offsite {
        config.same_domain_only = false;
    }

    Ok(config)
}

/// Generate default configuration file content
fn generate_default_config() -> Result<()> {
    let config = ScanConfig::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{}", toml);
    Ok(())
}

/// Run a full scan: crawl, analyze, detect, report
async fn run_scan(config: ScanConfig, output: Option<PathBuf>) -> Result<()> {
    let started_at = Utc::now();

    let analyzer = Arc::new(HttpAnalyzer::new(&config)?);
    let robots = Arc::new(RobotsCache::new(
        Arc::clone(&analyzer),
        Duration::from_secs(config.robots_cache_ttl_secs),
        Arc::new(SystemClock),
        config.user_agent.clone(),
    ));
    let exclusions = ExclusionMatcher::new(&config.exclude_rules)?;

    let crawler = Crawler::new(&config, exclusions, robots);
    let source = HtmlLinkSource::new(Arc::clone(&analyzer));
    let urls = crawler.crawl(&source).await?;

    tracing::info!(
        discovered = urls.len(),
        mode = config.mode.as_str(),
        "starting analysis"
    );

    let stats = Arc::new(ScanStats::default());
    let limiter = Arc::new(RateLimiter::new(
        config.requests_per_second.ceil().max(1.0) as u32,
        config.requests_per_second,
    ));
    let budget = Arc::new(BudgetGate::new(
        config.active.probe_budget,
        Duration::from_secs(config.active.time_budget_secs),
    ));

    let orchestrator = Arc::new(DetectorOrchestrator::new(
        &config,
        Arc::clone(&analyzer),
        budget,
        Arc::clone(&stats),
    )?);
    let coordinator = ScanCoordinator::new(config.concurrency, limiter, Arc::clone(&stats));

    let findings = coordinator.run(urls, orchestrator).await;
    let snapshot = stats.snapshot();

    tracing::info!(
        findings = findings.len(),
        attempts = snapshot.attempts_total,
        retries = snapshot.retries_total,
        peak_concurrency = snapshot.peak_concurrency,
        "scan complete"
    );

    let metadata = ReportMetadata::new(&config.target, config.mode, started_at);
    let report = ScanReport::new(metadata, findings, snapshot);

    match output {
        Some(path) => report.write_json(&path)?,
        None => println!("{}", report.to_json()?),
    }

    Ok(())
}
