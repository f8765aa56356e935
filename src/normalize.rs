//! Turns raw candidates into validated items with canonical UTC timestamps.
//!
//! Dates are resolved in this order, first hit wins:
//!
//! 1. ISO-8601 date-times (offset kept, or local to the target's timezone)
//!    and RFC 2822 timestamps
//! 2. relative phrases such as `3 hours ago`
//! 3. the target's `date_format`, then the common listing formats
//!    (`06 May 2025`, `May 6, 2025`, `05/06/2025`, `2025-05-06`, `06.05.2025`)
//! 4. a handful of generic layouts
//! 5. the time of the run
//!
//! Date-only values are midnight in the target's timezone.

use crate::models::{NormalizedItem, RawItem, Target};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::fmt;
use tracing::debug;

static ISO_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}").unwrap());

// Leading date-time of an ISO string plus whatever offset follows it.
static ISO_PARTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?)\s*(?:(Z|z)|([+-])(\d{2})(?::?(\d{2}))?)?",
    )
    .unwrap()
});

static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(\d+)\s*(minute|min|hour|hr|day|week|month|year)s?\s+ago\b")
        .case_insensitive(true)
        .build()
        .unwrap()
});

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})\b").unwrap()
});

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b").unwrap()
});

static SLASHED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

static DASHED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());

static DOTTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").unwrap());

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const GENERIC_DATETIMES: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M"];
const GENERIC_DATES: [&str; 3] = ["%Y/%m/%d", "%d-%m-%Y", "%Y%m%d"];

// Navigation and legal labels that show up under broad selectors on every site.
const BOILERPLATE: [&str; 16] = [
    r"home|homepage|inicio|startseite|accueil|anasayfa|ana sayfa|início",
    r"about( us)?|über uns|a propos|à propos|hakkımızda",
    r"contact( us)?|contacto|kontakt|contato|iletişim",
    r"privacy( policy| notice)?|privacidad|datenschutz|confidentialité|gizlilik",
    r"cookies?( policy| settings| preferences)?|accept( all)?( cookies)?",
    r"terms( and conditions| of use| of service)?|impressum|legal notice",
    r"subscribe( now)?|newsletter|abonnieren|s'abonner|suscríbete",
    r"sign (in|up)|log ?in|log ?out|register",
    r"menu|search|close|share",
    r"read more|more|see all|view all|tümü|alle|tous",
    r"next|previous|back to top",
    r"skip to (main )?content",
    r"news|latest news|press releases|haberler|noticias|nachrichten",
    r"careers|jobs",
    r"sitemap|accessibility",
    r"advertisement|sponsored",
];

static BOILERPLATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    BOILERPLATE
        .iter()
        .map(|p| whole_title_pattern(p).unwrap())
        .collect()
});

pub fn whole_title_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
}

/// Why a candidate title was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    Boilerplate,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { len, min } => write!(f, "title too short ({len} < {min})"),
            Rejection::TooLong { len, max } => write!(f, "title too long ({len} > {max})"),
            Rejection::Boilerplate => f.write_str("navigation or boilerplate label"),
        }
    }
}

/// Validity rules for one target's titles.
pub struct TitleFilter {
    min_length: usize,
    max_length: usize,
    excluded: Vec<Regex>,
}

impl TitleFilter {
    pub fn for_target(target: &Target) -> Self {
        let v = &target.verification;
        // Patterns were validated at config load.
        let excluded = v
            .excluded_patterns
            .iter()
            .filter_map(|p| whole_title_pattern(p).ok())
            .collect();
        Self {
            min_length: v.min_length,
            max_length: v.max_length,
            excluded,
        }
    }

    /// Length is counted in characters of the trimmed title, and patterns
    /// match the whole trimmed title.
    pub fn check(&self, title: &str) -> Result<(), Rejection> {
        let title = title.trim();
        let len = title.chars().count();
        if len < self.min_length {
            return Err(Rejection::TooShort {
                len,
                min: self.min_length,
            });
        }
        if len > self.max_length {
            return Err(Rejection::TooLong {
                len,
                max: self.max_length,
            });
        }
        if BOILERPLATE_PATTERNS
            .iter()
            .chain(&self.excluded)
            .any(|re| re.is_match(title))
        {
            return Err(Rejection::Boilerplate);
        }
        Ok(())
    }
}

/// Validate one candidate and resolve its date.
pub fn normalize(
    raw: RawItem,
    target: &Target,
    filter: &TitleFilter,
    now: DateTime<Utc>,
) -> Result<NormalizedItem, Rejection> {
    let title = raw.title.trim();
    filter.check(title)?;
    let date = parse_date(&raw.raw_date, target.timezone, target.date_format.as_deref(), now);
    Ok(NormalizedItem {
        title: title.to_string(),
        url: raw.url,
        date,
        source_name: raw.source_name,
        category: raw.category,
        scraped_at: now,
    })
}

/// Normalize every candidate of one extraction, dropping rejected ones.
pub fn normalize_all(raw: Vec<RawItem>, target: &Target, now: DateTime<Utc>) -> Vec<NormalizedItem> {
    let filter = TitleFilter::for_target(target);
    raw.into_iter()
        .filter_map(|item| {
            let title = item.title.clone();
            match normalize(item, target, &filter, now) {
                Ok(normalized) => Some(normalized),
                Err(reason) => {
                    debug!(title = %title, reason = %reason, "Dropped candidate");
                    None
                }
            }
        })
        .collect()
}

/// Resolve `raw` to a UTC instant, falling back to `now`.
pub fn parse_date(raw: &str, tz: Tz, date_format: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let raw = raw.trim();
    if raw.is_empty() {
        return now;
    }
    parse_iso(raw, tz)
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| parse_relative(raw, now))
        .or_else(|| date_format.and_then(|fmt| parse_with_format(raw, fmt, tz)))
        .or_else(|| parse_listing_formats(raw, tz))
        .or_else(|| parse_generic(raw, tz))
        .unwrap_or(now)
}

fn parse_iso(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if !ISO_PREFIX.is_match(raw) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%#z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    iso_leading(raw, tz)
}

/// Read the date-time at the start of `raw` and the offset right after it,
/// ignoring any trailing text. No offset means the target's timezone.
fn iso_leading(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let caps = ISO_PARTS.captures(raw)?;
    let stamp = caps[1].replace(',', ".");
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&stamp, fmt).ok())?;

    if caps.get(2).is_some() {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let Some(sign) = caps.get(3) else {
        return Some(localize(naive, tz));
    };
    let hours: i32 = caps[4].parse().ok()?;
    let minutes: i32 = caps.get(5).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let seconds = (hours * 3600 + minutes * 60) * if sign.as_str() == "-" { -1 } else { 1 };
    let offset = FixedOffset::east_opt(seconds)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_relative(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RELATIVE.captures(raw)?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = caps[2].to_ascii_lowercase();
    let minutes_per_unit: i64 = match unit.as_str() {
        "minute" | "min" => 1,
        "hour" | "hr" => 60,
        "day" => 60 * 24,
        "week" => 60 * 24 * 7,
        "month" => 60 * 24 * 30,
        "year" => 60 * 24 * 365,
        _ => return None,
    };
    let delta = Duration::try_minutes(amount.checked_mul(minutes_per_unit)?)?;
    now.checked_sub_signed(delta)
}

fn parse_with_format(raw: &str, fmt: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
        return Some(localize(naive, tz));
    }
    NaiveDate::parse_from_str(raw, fmt)
        .ok()
        .map(|date| midnight(date, tz))
}

fn parse_listing_formats(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let date = DAY_MONTH_YEAR
        .captures(raw)
        .and_then(|c| ymd(&c[3], month_number(&c[2])?, &c[1]))
        .or_else(|| {
            MONTH_DAY_YEAR
                .captures(raw)
                .and_then(|c| ymd(&c[3], month_number(&c[1])?, &c[2]))
        })
        .or_else(|| {
            DASHED
                .captures(raw)
                .and_then(|c| ymd(&c[1], c[2].parse().ok()?, &c[3]))
        })
        .or_else(|| {
            SLASHED
                .captures(raw)
                .and_then(|c| ymd(&c[3], c[1].parse().ok()?, &c[2]))
        })
        .or_else(|| {
            DOTTED
                .captures(raw)
                .and_then(|c| ymd(&c[3], c[2].parse().ok()?, &c[1]))
        })?;
    Some(midnight(date, tz))
}

fn parse_generic(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Some(naive) = GENERIC_DATETIMES
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(localize(naive, tz));
    }
    GENERIC_DATES
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| midnight(date, tz))
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

fn midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    localize(date.and_time(NaiveTime::MIN), tz)
}

/// Interpret `naive` as wall-clock time in `tz`. Times inside a DST gap are
/// read as UTC.
fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
