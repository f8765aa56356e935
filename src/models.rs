//! Data models for targets, scraped items and job outcomes.
//!
//! - [`Target`]: one configured page with its extraction rules, loaded once and
//!   shared read-only by every cycle
//! - [`RawItem`]: a candidate headline as read from the page
//! - [`NormalizedItem`]: a validated headline with a canonical UTC timestamp
//! - [`JobResult`]: the terminal outcome of one orchestrated run of one target
//! - [`CycleSummary`]: per-category counts for one full pass over the roster

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Batch a target belongs to. Declaration order is the cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Regulatory,
    Business,
    Crypto,
}

impl Category {
    /// Order in which categories run within a cycle.
    pub const ORDER: [Category; 3] = [Category::Regulatory, Category::Business, Category::Crypto];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Regulatory => "regulatory",
            Category::Business => "business",
            Category::Crypto => "crypto",
        }
    }

    /// Capitalized name used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Regulatory => "Regulatory",
            Category::Business => "Business",
            Category::Crypto => "Crypto",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title length bounds and extra boilerplate patterns for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub min_length: usize,
    pub max_length: usize,
    /// Regexes matched case-insensitively against the whole title, in addition
    /// to the built-in navigation/legal labels.
    pub excluded_patterns: Vec<String>,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            min_length: 15,
            max_length: 300,
            excluded_patterns: Vec::new(),
        }
    }
}

/// How the dedup key is built from an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DedupStrategy {
    #[default]
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "title+date")]
    TitleDate,
    #[serde(rename = "title+url")]
    TitleUrl,
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DedupStrategy::Title => "title",
            DedupStrategy::TitleDate => "title+date",
            DedupStrategy::TitleUrl => "title+url",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deduplication {
    pub strategy: DedupStrategy,
    /// Jaccard similarity at or above which two titles are duplicates.
    pub threshold: f64,
}

impl Default for Deduplication {
    fn default() -> Self {
        Self {
            strategy: DedupStrategy::Title,
            threshold: 0.8,
        }
    }
}

/// Scroll steps used to trigger lazy-loaded listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicContent {
    pub scroll_count: u32,
    pub scroll_delay_ms: u64,
    pub scroll_step: i64,
}

/// One external page to scrape.
///
/// Loaded and validated by [`crate::config`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
    pub category: Category,
    /// Tried in order; the first selector with at least one match wins.
    pub title_selectors: Vec<String>,
    #[serde(default)]
    pub date_selectors: Vec<String>,
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// `strftime` pattern tried before the built-in date formats.
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub deduplication: Deduplication,
    #[serde(default)]
    pub dynamic_content: Option<DynamicContent>,
    #[serde(default)]
    pub stealth: bool,
    /// Overrides the browser-wide navigation timeout for slow sites.
    #[serde(default)]
    pub navigation_timeout_secs: Option<u64>,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

#[cfg(test)]
impl Target {
    /// Bare target with one `h2` title selector and default rules.
    pub fn fixture(name: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            url: "https://news.example.com/latest".to_string(),
            category,
            title_selectors: vec!["h2".to_string()],
            date_selectors: vec![],
            wait_for_selector: None,
            timezone: Tz::UTC,
            date_format: None,
            verification: Verification::default(),
            deduplication: Deduplication::default(),
            dynamic_content: None,
            stealth: false,
            navigation_timeout_secs: None,
        }
    }
}

/// A candidate headline as extracted from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    /// Absolute URL.
    pub url: String,
    /// Date text as found on the page, empty when the page had none.
    pub raw_date: String,
    pub source_name: String,
    pub category: Category,
}

/// A headline that passed the validity filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub title: String,
    pub url: String,
    pub date: DateTime<Utc>,
    pub source_name: String,
    pub category: Category,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    NoData,
    Error,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::NoData => "no_data",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one run of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub source_name: String,
    pub category: Category,
    pub status: JobStatus,
    pub items: Vec<NormalizedItem>,
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl JobResult {
    /// Outcome of a run that produced `items` (possibly none).
    pub fn completed(target: &Target, items: Vec<NormalizedItem>, attempts: u32) -> Self {
        let status = if items.is_empty() {
            JobStatus::NoData
        } else {
            JobStatus::Success
        };
        Self {
            source_name: target.name.clone(),
            category: target.category,
            status,
            items,
            error_message: None,
            attempts,
        }
    }

    pub fn failed(target: &Target, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            source_name: target.name.clone(),
            category: target.category,
            status: JobStatus::Error,
            items: Vec::new(),
            error_message: Some(message.into()),
            attempts,
        }
    }

    pub fn skipped(target: &Target) -> Self {
        Self {
            source_name: target.name.clone(),
            category: target.category,
            status: JobStatus::Skipped,
            items: Vec::new(),
            error_message: None,
            attempts: 0,
        }
    }
}

/// Job counts for one category (or the whole cycle).
///
/// `success` includes `no_data` runs: the job completed, the page just had
/// nothing new that passed the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub total: usize,
    pub success: usize,
    pub no_data: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: usize,
}

impl CategoryCounts {
    pub fn record(&mut self, result: &JobResult) {
        self.total += 1;
        self.items += result.items.len();
        match result.status {
            JobStatus::Success => self.success += 1,
            JobStatus::NoData => {
                self.success += 1;
                self.no_data += 1;
            }
            JobStatus::Error => self.failed += 1,
            JobStatus::Skipped => self.skipped += 1,
        }
    }

    fn add(&mut self, other: &CategoryCounts) {
        self.total += other.total;
        self.success += other.success;
        self.no_data += other.no_data;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.items += other.items;
    }
}

/// Aggregated outcome of one full orchestration cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: BTreeMap<Category, CategoryCounts>,
}

impl CycleSummary {
    pub fn overall(&self) -> CategoryCounts {
        let mut all = CategoryCounts::default();
        for counts in self.categories.values() {
            all.add(counts);
        }
        all
    }

    /// True when jobs failed and no category had a single success.
    pub fn is_critical_failure(&self) -> bool {
        let all = self.overall();
        all.failed > 0 && self.categories.values().all(|c| c.success == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(category: Category) -> Target {
        Target {
            name: "SEC (US)".to_string(),
            url: "https://www.sec.gov/news/pressreleases".to_string(),
            category,
            title_selectors: vec!["div.article-title".to_string()],
            date_selectors: vec![],
            wait_for_selector: None,
            timezone: Tz::UTC,
            date_format: None,
            verification: Verification::default(),
            deduplication: Deduplication::default(),
            dynamic_content: None,
            stealth: false,
            navigation_timeout_secs: None,
        }
    }

    #[test]
    fn test_target_yaml_defaults() {
        let yaml = r#"
name: CoinDesk
url: https://www.coindesk.com/livewire
category: crypto
title_selectors: [".livewire-story h5"]
"#;
        let t: Target = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(t.category, Category::Crypto);
        assert_eq!(t.timezone, Tz::UTC);
        assert_eq!(t.verification.min_length, 15);
        assert_eq!(t.deduplication.strategy, DedupStrategy::Title);
        assert!((t.deduplication.threshold - 0.8).abs() < f64::EPSILON);
        assert!(!t.stealth);
        assert!(t.dynamic_content.is_none());
    }

    #[test]
    fn test_dedup_strategy_names() {
        let d: Deduplication =
            serde_yaml::from_str("strategy: title+date\nthreshold: 0.9").unwrap();
        assert_eq!(d.strategy, DedupStrategy::TitleDate);
        let d: Deduplication = serde_yaml::from_str("strategy: title+url").unwrap();
        assert_eq!(d.strategy, DedupStrategy::TitleUrl);
        assert_eq!(DedupStrategy::TitleUrl.to_string(), "title+url");
    }

    #[test]
    fn test_timezone_parses_by_name() {
        let yaml = r#"
name: FCA (UK)
url: https://www.fca.org.uk/news
category: regulatory
title_selectors: [".news-item h3"]
timezone: Europe/London
"#;
        let t: Target = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(t.timezone, chrono_tz::Europe::London);
    }

    #[test]
    fn test_category_order() {
        let mut cats = vec![Category::Crypto, Category::Regulatory, Category::Business];
        cats.sort();
        assert_eq!(cats, Category::ORDER.to_vec());
    }

    #[test]
    fn test_job_result_status_from_items() {
        let t = target(Category::Regulatory);
        assert_eq!(JobResult::completed(&t, vec![], 1).status, JobStatus::NoData);
        assert_eq!(JobResult::skipped(&t).attempts, 0);
        let failed = JobResult::failed(&t, "boom", 3);
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cycle_summary_totals_and_critical() {
        let reg = target(Category::Regulatory);
        let biz = target(Category::Business);

        let mut reg_counts = CategoryCounts::default();
        reg_counts.record(&JobResult::failed(&reg, "timeout", 3));
        reg_counts.record(&JobResult::skipped(&reg));
        let mut biz_counts = CategoryCounts::default();
        biz_counts.record(&JobResult::failed(&biz, "dns", 3));

        let now = Utc::now();
        let mut summary = CycleSummary {
            started_at: now,
            finished_at: now,
            categories: BTreeMap::from([
                (Category::Regulatory, reg_counts),
                (Category::Business, biz_counts),
            ]),
        };
        let all = summary.overall();
        assert_eq!(all.total, 3);
        assert_eq!(all.failed, 2);
        assert_eq!(all.skipped, 1);
        assert!(summary.is_critical_failure());

        summary
            .categories
            .get_mut(&Category::Business)
            .unwrap()
            .record(&JobResult::completed(&biz, vec![], 1));
        assert!(!summary.is_critical_failure());
        assert_eq!(summary.overall().no_data, 1);
    }
}
