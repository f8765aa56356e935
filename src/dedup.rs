//! Per-job duplicate suppression.
//!
//! Each item gets a key from its target's [`DedupStrategy`]: the normalized
//! title, optionally joined with the date or the URL. An item is dropped when
//!
//! - its key was already accepted, or
//! - its title is at least `threshold` similar (word-set Jaccard) to an
//!   accepted item with the same date (`title+date`), the same URL
//!   (`title+url`), or to any accepted item (`title`).
//!
//! The first occurrence always wins, so the output keeps input order and
//! deduplicating twice changes nothing.

use crate::models::{DedupStrategy, NormalizedItem};
use chrono::SecondsFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    PUNCTUATION
        .replace_all(&lowered, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the word sets of two titles, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a == b {
        return 1.0;
    }
    let words_a: HashSet<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
    let words_b: HashSet<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

/// Date or URL component the strategy adds to the key.
fn scope(item: &NormalizedItem, strategy: DedupStrategy) -> Option<String> {
    match strategy {
        DedupStrategy::Title => None,
        DedupStrategy::TitleDate => Some(item.date.to_rfc3339_opts(SecondsFormat::Secs, true)),
        DedupStrategy::TitleUrl => Some(item.url.clone()),
    }
}

pub fn dedup_key(item: &NormalizedItem, strategy: DedupStrategy) -> String {
    let title = normalize_text(&item.title);
    match scope(item, strategy) {
        Some(extra) => format!("{title}|{extra}"),
        None => title,
    }
}

/// Remove duplicates from one job's items, keeping first occurrences.
pub fn deduplicate(
    items: Vec<NormalizedItem>,
    strategy: DedupStrategy,
    threshold: f64,
) -> Vec<NormalizedItem> {
    let mut seen = HashSet::new();
    let mut kept: Vec<NormalizedItem> = Vec::with_capacity(items.len());

    for item in items {
        let key = dedup_key(&item, strategy);
        if seen.contains(&key) {
            debug!(title = %item.title, "Dropped exact duplicate");
            continue;
        }

        let item_scope = scope(&item, strategy);
        let near = kept.iter().find(|prior| {
            scope(prior, strategy) == item_scope && similarity(&prior.title, &item.title) >= threshold
        });
        if let Some(prior) = near {
            debug!(title = %item.title, similar_to = %prior.title, "Dropped near duplicate");
            continue;
        }

        seen.insert(key);
        kept.push(item);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, 0, 0, 0).unwrap()
    }

    fn item(title: &str, url: &str, date: DateTime<Utc>) -> NormalizedItem {
        NormalizedItem {
            title: title.to_string(),
            url: url.to_string(),
            date,
            source_name: "SEC (US)".to_string(),
            category: Category::Regulatory,
            scraped_at: at(10),
        }
    }

    fn titles(items: &[NormalizedItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  SEC Charges   Firm, Inc.! "), "sec charges firm inc");
        assert_eq!(normalize_text("Türkiye'de yeni düzenleme"), "türkiyede yeni düzenleme");
    }

    #[test]
    fn test_similarity_bounds_and_symmetry() {
        assert_eq!(similarity("SEC announces rule", "sec announces rule!"), 1.0);
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
        let a = "SEC announces new rule";
        let b = "SEC announces new rule today";
        assert!((similarity(a, b) - 0.8).abs() < 1e-9);
        assert_eq!(similarity(a, b), similarity(b, a));
        assert_eq!(similarity("", "..."), 1.0);
    }

    #[test]
    fn test_threshold_controls_near_duplicates() {
        let items = vec![
            item("SEC announces new rule", "https://sec.gov/1", at(6)),
            item("SEC announces new rule today", "https://sec.gov/2", at(6)),
        ];
        let loose = deduplicate(items.clone(), DedupStrategy::Title, 0.8);
        assert_eq!(titles(&loose), ["SEC announces new rule"]);

        let strict = deduplicate(items, DedupStrategy::Title, 0.99);
        assert_eq!(strict.len(), 2);
    }

    #[test]
    fn test_exact_key_duplicates_dropped() {
        let items = vec![
            item("Bitcoin tops $100k", "https://a/1", at(6)),
            item("bitcoin tops 100k", "https://a/2", at(6)),
            item("Ether slides on ETF outflows", "https://a/3", at(6)),
        ];
        let out = deduplicate(items, DedupStrategy::Title, 1.0);
        assert_eq!(titles(&out), ["Bitcoin tops $100k", "Ether slides on ETF outflows"]);
    }

    #[test]
    fn test_title_date_keeps_same_title_on_other_days() {
        let items = vec![
            item("Weekly market wrap", "https://a/1", at(5)),
            item("Weekly market wrap", "https://a/2", at(12)),
            item("Weekly market wrap!", "https://a/3", at(5)),
        ];
        let out = deduplicate(items, DedupStrategy::TitleDate, 0.8);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date, at(5));
        assert_eq!(out[1].date, at(12));
    }

    #[test]
    fn test_title_url_scopes_by_link() {
        let items = vec![
            item("Regulator issues warning on crypto ads", "https://a/1", at(6)),
            item("Regulator issues warning on crypto ads", "https://a/2", at(6)),
            item("Regulator issues a warning on crypto ads", "https://a/1", at(6)),
        ];
        let out = deduplicate(items, DedupStrategy::TitleUrl, 0.8);
        assert_eq!(out.iter().map(|i| i.url.as_str()).collect::<Vec<_>>(), ["https://a/1", "https://a/2"]);
    }

    #[test]
    fn test_idempotent() {
        let items = vec![
            item("SEC announces new rule", "https://sec.gov/1", at(6)),
            item("SEC announces new rule today", "https://sec.gov/2", at(6)),
            item("FINRA fines broker-dealer", "https://sec.gov/3", at(6)),
            item("finra fines broker dealer", "https://sec.gov/4", at(7)),
        ];
        for strategy in [DedupStrategy::Title, DedupStrategy::TitleDate, DedupStrategy::TitleUrl] {
            let once = deduplicate(items.clone(), strategy, 0.8);
            let twice = deduplicate(once.clone(), strategy, 0.8);
            assert_eq!(once, twice, "{strategy}");
        }
    }
}
