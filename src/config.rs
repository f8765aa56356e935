//! Roster and runtime settings, loaded once from YAML at startup.
//!
//! ```yaml
//! schedule:
//!   interval_secs: 10800
//! orchestrator:
//!   max_attempts: 3
//! browser:
//!   navigation_timeout_secs: 60
//! targets:
//!   - name: SEC (US)
//!     url: https://www.sec.gov/news/pressreleases
//!     category: regulatory
//!     title_selectors: ["div.article-title", "h2 a"]
//!     date_selectors: ["div.datetime"]
//!     date_format: "%B %d, %Y"
//! ```
//!
//! Every section except `targets` is optional. Loading fails with a
//! [`ConfigError`] if any target breaks an invariant, so the rest of the
//! pipeline never has to re-check shapes.

use crate::error::ConfigError;
use crate::extract::ExtractOptions;
use crate::models::Target;
use crate::normalize::whole_title_pattern;
use crate::orchestrator::{OrchestratorSettings, RetryPolicy};
use crate::scheduler::Schedule;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// Default location of the roster file.
pub const DEFAULT_CONFIG_PATH: &str = "config/targets.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    pub startup_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3 * 60 * 60,
            startup_delay_secs: 45,
        }
    }
}

impl ScheduleConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            startup_delay: Duration::from_secs(self.startup_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_jitter_ms: u64,
    pub inter_target_delay_secs: u64,
    pub inter_category_delay_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_secs: 5,
            max_backoff_secs: 60,
            backoff_jitter_ms: 250,
            inter_target_delay_secs: 8,
            inter_category_delay_secs: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self, next_run: Option<Duration>) -> OrchestratorSettings {
        OrchestratorSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_secs(self.base_backoff_secs),
                max_delay: Duration::from_secs(self.max_backoff_secs),
                jitter_ms: self.backoff_jitter_ms,
            },
            inter_target_delay: Duration::from_secs(self.inter_target_delay_secs),
            inter_category_delay: Duration::from_secs(self.inter_category_delay_secs),
            next_run,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    /// Upper bound on one whole extraction (navigation, scrolling, queries).
    pub job_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub navigation_pause_ms: u64,
    pub max_items: usize,
    /// Base URL of a Browserless-compatible render service. Pages are fetched
    /// directly when unset.
    pub render_endpoint: Option<String>,
    pub render_token: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 60,
            selector_timeout_secs: 20,
            job_timeout_secs: 180,
            settle_delay_ms: 1000,
            navigation_pause_ms: 2000,
            max_items: 20,
            render_endpoint: None,
            render_token: None,
        }
    }
}

impl BrowserConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            selector_timeout: Duration::from_secs(self.selector_timeout_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            navigation_pause: Duration::from_millis(self.navigation_pause_ms),
            max_items: self.max_items,
        }
    }
}

/// Read, parse and validate the config file at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&raw)?;
    info!(targets = config.targets.len(), "Loaded target roster");
    Ok(config)
}

/// Parse and validate YAML config text.
pub fn parse(yaml: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(yaml)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }
    if config.orchestrator.max_attempts == 0 {
        return Err(ConfigError::ZeroAttempts);
    }

    let mut names = HashSet::new();
    for target in &config.targets {
        if !names.insert(target.name.as_str()) {
            return Err(ConfigError::DuplicateName(target.name.clone()));
        }
        validate_target(target)?;
    }
    Ok(())
}

fn validate_target(target: &Target) -> Result<(), ConfigError> {
    let name = || target.name.clone();

    if target.title_selectors.is_empty() {
        return Err(ConfigError::EmptyTitleSelectors { target: name() });
    }

    let threshold = target.deduplication.threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::InvalidThreshold {
            target: name(),
            threshold,
        });
    }

    let v = &target.verification;
    if v.min_length > v.max_length {
        return Err(ConfigError::InvalidLengthBounds {
            target: name(),
            min: v.min_length,
            max: v.max_length,
        });
    }

    match Url::parse(&target.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            return Err(ConfigError::InvalidUrl {
                target: name(),
                url: target.url.clone(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        Err(e) => {
            return Err(ConfigError::InvalidUrl {
                target: name(),
                url: target.url.clone(),
                reason: e.to_string(),
            });
        }
    }

    let selectors = target
        .title_selectors
        .iter()
        .chain(&target.date_selectors)
        .chain(target.wait_for_selector.iter());
    for selector in selectors {
        if Selector::parse(selector).is_err() {
            return Err(ConfigError::InvalidSelector {
                target: name(),
                selector: selector.clone(),
            });
        }
    }

    for pattern in &v.excluded_patterns {
        if let Err(e) = whole_title_pattern(pattern) {
            return Err(ConfigError::InvalidPattern {
                target: name(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
