//! Scan configuration management
//!
//! A `ScanConfig` is built once from a TOML file plus CLI overrides,
//! validated, and then treated as immutable for the whole run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::spider::url::ExclusionMatcher;

/// Operating mode, ordered by capability.
///
/// `Aggressive` enables the union of the `SafePlus` and `AggressiveLite`
/// probe categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Safe,
    SafePlus,
    AggressiveLite,
    Aggressive,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Safe => "safe",
            Mode::SafePlus => "safe-plus",
            Mode::AggressiveLite => "aggressive-lite",
            Mode::Aggressive => "aggressive",
        }
    }
}

/// Full scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Seed URL the crawl starts from
    pub target: String,

    /// Maximum crawl depth from the seed
    pub max_depth: u32,

    /// Restrict the crawl to the seed's host
    pub same_domain_only: bool,

    /// Operating mode
    pub mode: Mode,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum concurrently running per-URL pipelines
    pub concurrency: usize,

    /// Follow redirects on analysis requests
    pub follow_redirects: bool,

    /// Aggregate outbound request rate target
    pub requests_per_second: f64,

    /// Exclusion rules (`re:` regex, glob, or path substring)
    pub exclude_rules: Vec<String>,

    /// Consult robots.txt before visiting a URL
    pub respect_robots: bool,

    /// Cache TTL for successfully fetched robots policies, in seconds
    pub robots_cache_ttl_secs: u64,

    /// Maximum injected parameters per URL
    pub max_params_per_url: usize,

    /// Parameter names to prioritize when discovered
    pub param_hints: Vec<String>,

    /// User agent string
    pub user_agent: String,

    /// Active probing sub-configuration
    pub active: ActiveConfig,
}

/// Tuning for active probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveConfig {
    /// Maximum number of active probe executions per run
    pub probe_budget: u64,

    /// Wall-clock budget for active probing, in seconds
    pub time_budget_secs: u64,

    /// Per-category enable flags (intersected with the mode's matrix)
    pub xss: bool,
    pub sqli: bool,
    pub cors: bool,
    pub open_redirect: bool,
    pub path_traversal: bool,
    pub ssti: bool,
    pub mixed_content: bool,

    /// Enable the size-delta anomaly heuristic (off by default)
    pub size_delta_anomaly: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            max_depth: 3,
            same_domain_only: true,
            mode: Mode::Safe,
            timeout_secs: 15,
            concurrency: 8,
            follow_redirects: true,
            requests_per_second: 5.0,
            exclude_rules: Vec::new(),
            respect_robots: true,
            robots_cache_ttl_secs: 30 * 60,
            max_params_per_url: 8,
            param_hints: Vec::new(),
            user_agent: format!("Strix/{}", env!("CARGO_PKG_VERSION")),
            active: ActiveConfig::default(),
        }
    }
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            probe_budget: 200,
            time_budget_secs: 10 * 60,
            xss: true,
            sqli: true,
            cors: true,
            open_redirect: true,
            path_traversal: true,
            ssti: true,
            mixed_content: true,
            size_delta_anomaly: false,
        }
    }
}

impl ScanConfig {
    /// Load configuration from a TOML file, or defaults when absent
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => match Self::default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                    path: config_path.display().to_string(),
                    source,
                })?;

            let config: ScanConfig =
                toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

            tracing::info!(path = %config_path.display(), "Loaded configuration");
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "strix", "strix")?;
        Some(dirs.config_dir().join("config.toml"))
    }

    /// Validate the configuration, failing fast before any crawling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = Url::parse(&self.target)
            .map_err(|_| ConfigError::InvalidTarget(self.target.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidTarget(self.target.clone()));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::ValidationError {
                field: "concurrency".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if !(self.requests_per_second > 0.0) {
            return Err(ConfigError::ValidationError {
                field: "requests_per_second".into(),
                reason: "must be positive".into(),
            });
        }

        if self.robots_cache_ttl_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "robots_cache_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.mode != Mode::Safe {
            if self.active.probe_budget == 0 {
                return Err(ConfigError::ValidationError {
                    field: "active.probe_budget".into(),
                    reason: "must be greater than 0 for active modes".into(),
                });
            }
            if self.active.time_budget_secs == 0 {
                return Err(ConfigError::ValidationError {
                    field: "active.time_budget_secs".into(),
                    reason: "must be greater than 0 for active modes".into(),
                });
            }
        }

        // Compiling the matcher surfaces malformed `re:` rules here rather
        // than mid-crawl.
        ExclusionMatcher::new(&self.exclude_rules)?;

        Ok(())
    }
}
