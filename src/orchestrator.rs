//! Job orchestration: one target at a time, retried, isolated and reported.
//!
//! [`Orchestrator::run_target`] is the only path from a target to a
//! [`JobResult`]. It guarantees:
//!
//! - at most one in-flight job per target name (a second request is
//!   answered with [`JobStatus::Skipped`] without touching the page)
//! - at most `max_attempts` extraction attempts, with exponential backoff
//! - a panic inside the job becomes an `Error` outcome for that target only
//! - every outcome except `Skipped` is persisted exactly once
//!
//! [`Orchestrator::run_cycle`] runs the whole roster category by category,
//! sequentially, and reports a summary.
//!
//! # Backoff
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter_ms)
//! ```

use crate::dedup;
use crate::extract::Extract;
use crate::models::{Category, CategoryCounts, CycleSummary, JobResult, JobStatus, Target};
use crate::normalize;
use crate::notify::{self, Notifier};
use crate::outputs::ItemStore;
use chrono::Utc;
use futures::FutureExt;
use rand::{Rng, rng};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Retry limits for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1 << exp);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        if self.jitter_ms > 0 {
            delay += Duration::from_millis(rng().random_range(0..=self.jitter_ms));
        }
        delay
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub inter_target_delay: Duration,
    pub inter_category_delay: Duration,
    /// Shown in the cycle summary when a scheduler will run again.
    pub next_run: Option<Duration>,
}

pub struct Orchestrator<E, S, N> {
    extractor: E,
    store: S,
    notifier: N,
    settings: OrchestratorSettings,
    active: Mutex<HashSet<String>>,
}

/// Marks a target as in flight until dropped.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> ActiveGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(name.to_string()) {
            return None;
        }
        Some(Self {
            active,
            name: name.to_string(),
        })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Targets grouped by category in cycle order, keeping roster order inside
/// each group. Empty categories are left out.
pub fn group_by_category(targets: &[Target]) -> Vec<(Category, Vec<&Target>)> {
    Category::ORDER
        .iter()
        .map(|&category| {
            let batch: Vec<&Target> = targets.iter().filter(|t| t.category == category).collect();
            (category, batch)
        })
        .filter(|(_, batch)| !batch.is_empty())
        .collect()
}

impl<E: Extract, S: ItemStore, N: Notifier> Orchestrator<E, S, N> {
    pub fn new(extractor: E, store: S, notifier: N, settings: OrchestratorSettings) -> Self {
        Self {
            extractor,
            store,
            notifier,
            settings,
            active: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    fn is_running(&self, name: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Send `message`, logging delivery failures.
    pub async fn broadcast(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message).await {
            warn!(error = %e, "Notification not delivered");
        }
    }

    /// Run one target end to end and return its outcome.
    #[instrument(level = "info", skip_all, fields(target = %target.name, category = %target.category))]
    pub async fn run_target(&self, target: &Target) -> JobResult {
        let Some(_guard) = ActiveGuard::acquire(&self.active, &target.name) else {
            warn!("Target already running; skipping");
            return JobResult::skipped(target);
        };

        let t0 = Instant::now();
        let attempts = AtomicU32::new(0);
        let result = match AssertUnwindSafe(self.execute(target, &attempts))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(&*panic);
                error!(panic = %msg, "Job panicked");
                JobResult::failed(
                    target,
                    format!("job panicked: {msg}"),
                    attempts.load(Ordering::SeqCst).max(1),
                )
            }
        };

        self.persist(&result).await;
        self.report(target, &result).await;

        info!(
            status = %result.status,
            items = result.items.len(),
            attempts = result.attempts,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Job finished"
        );
        result
    }

    async fn execute(&self, target: &Target, attempts: &AtomicU32) -> JobResult {
        let policy = &self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            attempts.store(attempt, Ordering::SeqCst);
            match self.extractor.extract(target).await {
                Ok(raw) => {
                    let found = raw.len();
                    let now = Utc::now();
                    let normalized = normalize::normalize_all(raw, target, now);
                    let valid = normalized.len();
                    let items = dedup::deduplicate(
                        normalized,
                        target.deduplication.strategy,
                        target.deduplication.threshold,
                    );
                    info!(attempt, found, valid, kept = items.len(), "Extraction succeeded");
                    return JobResult::completed(target, items, attempt);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Extraction attempt failed; backing off"
                    );
                    last_error = e.to_string();
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Extraction failed; giving up");
                    last_error = e.to_string();
                }
            }
        }

        JobResult::failed(target, last_error, max_attempts)
    }

    async fn persist(&self, result: &JobResult) {
        if let Err(e) = self
            .store
            .store(
                &result.source_name,
                result.category,
                &result.items,
                result.status,
                result.error_message.as_deref(),
            )
            .await
        {
            error!(error = %e, "Failed to persist job outcome");
        }
    }

    async fn report(&self, target: &Target, result: &JobResult) {
        match result.status {
            JobStatus::Success => {
                self.broadcast(&notify::job_success_message(target, &result.items))
                    .await
            }
            JobStatus::Error => {
                let error = result.error_message.as_deref().unwrap_or("unknown error");
                self.broadcast(&notify::job_failure_message(target, error))
                    .await
            }
            JobStatus::NoData | JobStatus::Skipped => {}
        }
    }

    async fn run_category(&self, category: Category, batch: &[&Target]) -> CategoryCounts {
        info!(category = %category, targets = batch.len(), "Starting category");
        let mut counts = CategoryCounts::default();
        for (i, target) in batch.iter().enumerate() {
            if i > 0 {
                sleep(self.settings.inter_target_delay).await;
            }
            let result = self.run_target(target).await;
            counts.record(&result);
        }
        info!(
            category = %category,
            success = counts.success,
            total = counts.total,
            items = counts.items,
            "Category completed"
        );
        counts
    }

    /// Run every target once and send the cycle report.
    #[instrument(level = "info", skip_all, fields(targets = targets.len()))]
    pub async fn run_cycle(&self, targets: &[Target]) -> CycleSummary {
        let started_at = Utc::now();
        let mut categories = BTreeMap::new();

        for (i, (category, batch)) in group_by_category(targets).into_iter().enumerate() {
            if i > 0 {
                sleep(self.settings.inter_category_delay).await;
            }
            let counts = self.run_category(category, &batch).await;
            categories.insert(category, counts);
        }

        let summary = CycleSummary {
            started_at,
            finished_at: Utc::now(),
            categories,
        };
        let all = summary.overall();
        info!(
            success = all.success,
            failed = all.failed,
            skipped = all.skipped,
            items = all.items,
            "Cycle completed"
        );

        let message = if summary.is_critical_failure() {
            error!("Every target failed this cycle");
            notify::critical_failure_message(&summary)
        } else {
            notify::cycle_summary_message(&summary, self.settings.next_run)
        };
        self.broadcast(&message).await;
        summary
    }
}
