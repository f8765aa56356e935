//! Periodic cycle trigger.
//!
//! The first cycle starts after `startup_delay`, then one every `interval`.
//! A cycle that overruns its slot delays the next tick rather than stacking
//! runs, so cycles never overlap. Shutdown is observed between and during
//! cycles; a cycle cut short leaves no target marked as running.
//!
//! Manual cycles (SIGUSR1 on unix) are served next to the timer on the same
//! orchestrator. A target the scheduled cycle is already working on comes
//! back `Skipped` from the manual one.

use crate::extract::Extract;
use crate::models::Target;
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;
use crate::outputs::ItemStore;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub startup_delay: Duration,
}

/// Run cycles on `schedule` until `shutdown` resolves. Returns the number of
/// cycles that completed.
pub async fn run<E, S, N, F>(
    orchestrator: &Orchestrator<E, S, N>,
    targets: &[Target],
    schedule: Schedule,
    shutdown: F,
) -> u64
where
    E: Extract,
    S: ItemStore,
    N: Notifier,
    F: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + schedule.startup_delay, schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(
        interval_secs = schedule.interval.as_secs(),
        startup_delay_secs = schedule.startup_delay.as_secs(),
        "Scheduler started"
    );

    let mut completed = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        info!(cycle = completed + 1, "Scheduled cycle triggered");
        tokio::select! {
            _ = &mut shutdown => {
                warn!(cycle = completed + 1, "Shutdown requested mid-cycle; abandoning it");
                break;
            }
            summary = orchestrator.run_cycle(targets) => {
                completed += 1;
                let all = summary.overall();
                info!(
                    cycle = completed,
                    success = all.success,
                    total = all.total,
                    "Scheduled cycle finished"
                );
            }
        }
    }

    info!(cycles = completed, "Scheduler stopped");
    completed
}

/// Run a full cycle per request on `requests` until `shutdown` resolves or
/// every sender is gone. Returns the number of manual cycles that completed.
pub async fn serve_manual<E, S, N, F>(
    orchestrator: &Orchestrator<E, S, N>,
    targets: &[Target],
    mut requests: mpsc::Receiver<()>,
    shutdown: F,
) -> u64
where
    E: Extract,
    S: ItemStore,
    N: Notifier,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut completed = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            request = requests.recv() => {
                if request.is_none() {
                    info!("Manual trigger closed");
                    break;
                }
            }
        }

        info!("Manual cycle triggered");
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Shutdown requested mid-cycle; abandoning manual cycle");
                break;
            }
            summary = orchestrator.run_cycle(targets) => {
                completed += 1;
                let all = summary.overall();
                info!(
                    success = all.success,
                    skipped = all.skipped,
                    total = all.total,
                    "Manual cycle finished"
                );
            }
        }
    }
    completed
}

/// Queue a manual cycle on every SIGUSR1. Signals arriving while one is
/// already queued are folded into it.
#[cfg(unix)]
pub fn manual_trigger_on_sigusr1(requests: mpsc::Sender<()>) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    use tokio::sync::mpsc::error::TrySendError;

    let mut usr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            info!("SIGUSR1 received; queueing a manual cycle");
            if let Err(TrySendError::Closed(())) = requests.try_send(()) {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, NotificationError, PersistenceError};
    use crate::models::{Category, JobStatus, NormalizedItem, RawItem};
    use crate::orchestrator::{OrchestratorSettings, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Extract for &CountingExtractor {
        async fn extract(&self, _target: &Target) -> Result<Vec<RawItem>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    struct NullStore;

    impl ItemStore for NullStore {
        async fn store(
            &self,
            _source_name: &str,
            _category: Category,
            _items: &[NormalizedItem],
            _status: JobStatus,
            _error_message: Option<&str>,
        ) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    struct NullNotifier;

    impl Notifier for NullNotifier {
        async fn notify(&self, _message: &str) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    fn orchestrator(extractor: &CountingExtractor) -> Orchestrator<&CountingExtractor, NullStore, NullNotifier> {
        let settings = OrchestratorSettings {
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter_ms: 0,
            },
            inter_target_delay: Duration::ZERO,
            inter_category_delay: Duration::ZERO,
            next_run: None,
        };
        Orchestrator::new(extractor, NullStore, NullNotifier, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_interval_until_shutdown() {
        let extractor = CountingExtractor::default();
        let orch = orchestrator(&extractor);
        let targets = [Target::fixture("SEC (US)", Category::Regulatory)];
        let schedule = Schedule {
            interval: Duration::from_secs(60),
            startup_delay: Duration::from_secs(5),
        };

        // Ticks at 5s, 65s, 125s; shutdown at 150s.
        let cycles = run(&orch, &targets, schedule, sleep(Duration::from_secs(150))).await;
        assert_eq!(cycles, 3);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick() {
        let extractor = CountingExtractor::default();
        let orch = orchestrator(&extractor);
        let targets = [Target::fixture("SEC (US)", Category::Regulatory)];
        let schedule = Schedule {
            interval: Duration::from_secs(60),
            startup_delay: Duration::from_secs(45),
        };

        let cycles = run(&orch, &targets, schedule, sleep(Duration::from_secs(10))).await;
        assert_eq!(cycles, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_cycle_skips_target_busy_in_scheduled_cycle() {
        let extractor = CountingExtractor {
            delay: Duration::from_secs(30),
            ..CountingExtractor::default()
        };
        let orch = orchestrator(&extractor);
        let targets = [Target::fixture("SEC (US)", Category::Regulatory)];
        let schedule = Schedule {
            interval: Duration::from_secs(3600),
            startup_delay: Duration::ZERO,
        };
        let (tx, rx) = mpsc::channel(1);

        // Scheduled cycle holds the target from 0s to 30s. The first manual
        // request lands inside that window, the second after it.
        let requests = async move {
            sleep(Duration::from_secs(10)).await;
            tx.send(()).await.unwrap();
            sleep(Duration::from_secs(40)).await;
            tx.send(()).await.unwrap();
        };
        let (cycles, manual, ()) = tokio::join!(
            run(&orch, &targets, schedule, sleep(Duration::from_secs(120))),
            serve_manual(&orch, &targets, rx, sleep(Duration::from_secs(120))),
            requests,
        );

        assert_eq!(cycles, 1);
        assert_eq!(manual, 2);
        // Scheduled run plus the second manual run; the first was skipped.
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_serving_stops_when_trigger_closes() {
        let extractor = CountingExtractor::default();
        let orch = orchestrator(&extractor);
        let targets = [Target::fixture("CoinDesk", Category::Crypto)];
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        drop(tx);

        let manual = serve_manual(&orch, &targets, rx, std::future::pending()).await;
        assert_eq!(manual, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_does_not_overlap() {
        let extractor = CountingExtractor {
            delay: Duration::from_secs(90),
            ..CountingExtractor::default()
        };
        let orch = orchestrator(&extractor);
        let targets = [Target::fixture("CoinDesk", Category::Crypto)];
        let schedule = Schedule {
            interval: Duration::from_secs(60),
            startup_delay: Duration::ZERO,
        };

        // Cycles run 0-90s and 90-180s; the third is cut short at 200s.
        let cycles = run(&orch, &targets, schedule, sleep(Duration::from_secs(200))).await;
        assert_eq!(cycles, 2);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }
}
