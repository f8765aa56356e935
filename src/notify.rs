//! Operator notifications.
//!
//! Messages are plain text. The orchestrator sends them best-effort: a
//! [`NotificationError`] is logged and otherwise ignored.
//!
//! - [`LogNotifier`]: writes messages to the log (no channel configured)
//! - [`TelegramNotifier`]: Telegram Bot API `sendMessage`, retried with a
//!   growing delay
//! - [`Notifiers`]: whichever of the two the environment configures

use crate::error::NotificationError;
use crate::models::{CategoryCounts, CycleSummary, NormalizedItem, Target};
use crate::utils::{clip, hashtag, truncate_for_log};
use chrono::Utc;
use itertools::Itertools;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram rejects messages above 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Delivers a text message to the operator.
pub trait Notifier {
    async fn notify(&self, message: &str) -> Result<(), NotificationError>;
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotificationError> {
        info!(message = %message, "Notification");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    max_attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: TELEGRAM_API.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point at a different Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    #[cfg(test)]
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Result<(), NotificationError> {
        let resp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body: truncate_for_log(&text, 200),
        })
    }
}

impl Notifier for TelegramNotifier {
    #[instrument(level = "debug", skip_all, fields(chat_id = %self.chat_id))]
    async fn notify(&self, message: &str) -> Result<(), NotificationError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": clip(message, MAX_MESSAGE_CHARS),
            "disable_web_page_preview": true,
        });

        let mut attempt = 1;
        loop {
            match self.send_once(&url, &body).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry_delay * attempt;
                    warn!(attempt, ?delay, error = %e, "Telegram send failed; retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// The notifier selected at startup.
#[derive(Debug, Clone)]
pub enum Notifiers {
    Log(LogNotifier),
    Telegram(TelegramNotifier),
}

impl Notifiers {
    /// Telegram when both credentials are present, the log otherwise.
    pub fn from_credentials(
        token: Option<String>,
        chat_id: Option<String>,
        api_base: Option<String>,
    ) -> Self {
        match (token, chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                let telegram = TelegramNotifier::new(token, chat_id);
                Notifiers::Telegram(match api_base {
                    Some(base) => telegram.with_api_base(base),
                    None => telegram,
                })
            }
            _ => Notifiers::Log(LogNotifier),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Notifiers::Log(_) => "log",
            Notifiers::Telegram(_) => "telegram",
        }
    }
}

impl Notifier for Notifiers {
    async fn notify(&self, message: &str) -> Result<(), NotificationError> {
        match self {
            Notifiers::Log(n) => n.notify(message).await,
            Notifiers::Telegram(n) => n.notify(message).await,
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    match (secs / 3600, secs % 3600 / 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// New items found on one target: count, the first three titles, hashtags.
pub fn job_success_message(target: &Target, items: &[NormalizedItem]) -> String {
    let top = items
        .iter()
        .take(3)
        .map(|item| format!("• {}", clip(&item.title, 60)))
        .join("\n");
    format!(
        "✅ {name}: {count} new items\n\n{top}\n\n{tag} #{category}",
        name = target.name,
        count = items.len(),
        tag = hashtag(&target.name),
        category = target.category.label(),
    )
}

pub fn job_failure_message(target: &Target, error: &str) -> String {
    format!(
        "❌ {name} scraping failed\n\nURL: {url}\nError: {error}\nTime: {time}\n\n{tag} #Error",
        name = target.name,
        url = target.url,
        error = clip(error, 100),
        time = timestamp(),
        tag = hashtag(&target.name),
    )
}

fn category_line(label: &str, counts: &CategoryCounts) -> String {
    format!(
        "{label}: {success}/{total} ({items} items)",
        success = counts.success,
        total = counts.total,
        items = counts.items,
    )
}

/// End-of-cycle report with per-category `success/total`.
pub fn cycle_summary_message(summary: &CycleSummary, next_run: Option<Duration>) -> String {
    let lines = summary
        .categories
        .iter()
        .map(|(category, counts)| category_line(category.label(), counts))
        .join("\n");
    let all = summary.overall();
    let mut message = format!(
        "📊 Scraping cycle complete\n\n{lines}\n\nTotal: {success}/{total} succeeded, {failed} failed, {skipped} skipped, {items} items",
        success = all.success,
        total = all.total,
        failed = all.failed,
        skipped = all.skipped,
        items = all.items,
    );
    if let Some(next) = next_run {
        message.push_str(&format!("\nNext run in {}", format_interval(next)));
    }
    message
}

pub fn critical_failure_message(summary: &CycleSummary) -> String {
    let all = summary.overall();
    format!(
        "🚨 CRITICAL: all scrapers failed\n\n{failed}/{total} targets failed and none succeeded.\nTime: {time}\n\n#Critical #Error",
        failed = all.failed,
        total = all.total,
        time = timestamp(),
    )
}

pub fn startup_message(target_count: usize, interval: Duration) -> String {
    format!(
        "🤖 Target watch online\n\nMonitoring {target_count} sources every {}\nStarted: {}",
        format_interval(interval),
        timestamp(),
    )
}
