//! # Target Watch
//!
//! Scrapes a fixed roster of regulatory, business and crypto news pages on a
//! timer, keeps the headlines that look real, drops duplicates, writes one
//! JSON record per job and tells the operator how each cycle went.
//!
//! ## Usage
//!
//! ```sh
//! target_watch                      # run forever on the configured schedule
//! target_watch --once               # one full cycle, then exit
//! target_watch --target "SEC (US)"  # one target, then exit
//! target_watch --list               # print the roster
//! kill -USR1 <pid>                  # run a cycle now, next to the schedule
//! ```
//!
//! ## Architecture
//!
//! 1. **Config**: the roster and settings are loaded and validated once
//! 2. **Extraction**: each target gets a fresh browser session; titles and
//!    dates are read with the target's fallback selectors
//! 3. **Normalization**: titles are filtered, dates resolved to UTC
//! 4. **Deduplication**: per job, by exact key and title similarity
//! 5. **Orchestration**: retries, panic isolation, one job per target at a
//!    time, categories in order, persistence and notifications
//! 6. **Scheduling**: a cycle after the startup delay, then every interval,
//!    plus manual cycles on SIGUSR1 sharing the same running-target guard

use clap::Parser;
use std::error::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod browser;
mod cli;
mod config;
mod dedup;
mod error;
mod extract;
mod models;
mod normalize;
mod notify;
mod orchestrator;
mod outputs;
mod scheduler;
mod utils;

use browser::http::HttpSessionProvider;
use cli::Cli;
use extract::Extractor;
use models::Target;
use notify::Notifiers;
use orchestrator::{Orchestrator, group_by_category};
use outputs::json::JsonStore;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "target_watch starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), output_dir = %args.output_dir.display(), "Parsed CLI arguments");

    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration; refusing to start");
            return Err(e.into());
        }
    };

    if args.list {
        print_roster(&config.targets);
        return Ok(());
    }

    // Early check: ensure the record directory is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let render_endpoint = args
        .render_endpoint
        .clone()
        .or_else(|| config.browser.render_endpoint.clone());
    let render_token = args
        .render_token
        .clone()
        .or_else(|| config.browser.render_token.clone());
    let provider = match &render_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Fetching pages through render service");
            HttpSessionProvider::rendered(endpoint, render_token)
        }
        None => {
            info!("Fetching pages directly");
            HttpSessionProvider::direct()
        }
    };

    let notifier = Notifiers::from_credentials(
        args.telegram_bot_token.clone(),
        args.telegram_chat_id.clone(),
        args.telegram_api_url.clone(),
    );
    info!(channel = notifier.channel(), "Notifications configured");

    let store = JsonStore::new(&args.output_dir);
    info!(root = %store.root().display(), "Writing job records");

    let schedule = config.schedule.schedule();
    let daemon = !args.once && args.target.is_none();
    let orchestrator = Orchestrator::new(
        Extractor::new(provider, config.browser.extract_options()),
        store,
        notifier,
        config.orchestrator.settings(daemon.then_some(schedule.interval)),
    );

    if let Some(name) = &args.target {
        let Some(target) = config.targets.iter().find(|t| &t.name == name) else {
            error!(target = %name, "No such target in roster");
            return Err(format!("unknown target {name:?}").into());
        };
        let result = orchestrator.run_target(target).await;
        info!(
            status = %result.status,
            items = result.items.len(),
            attempts = result.attempts,
            "Single target run finished"
        );
        return Ok(());
    }

    if args.once {
        let summary = orchestrator.run_cycle(&config.targets).await;
        let all = summary.overall();
        info!(
            success = all.success,
            failed = all.failed,
            items = all.items,
            elapsed_secs = start_time.elapsed().as_secs(),
            "Single cycle finished"
        );
        return Ok(());
    }

    orchestrator
        .broadcast(&notify::startup_message(config.targets.len(), schedule.interval))
        .await;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        let _ = stop_tx.send(true);
    });
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let (manual_tx, manual_rx) = mpsc::channel(1);
    install_manual_trigger(manual_tx);

    let (cycles, manual_cycles) = tokio::join!(
        scheduler::run(&orchestrator, &config.targets, schedule, stopped(stop_rx.clone())),
        scheduler::serve_manual(&orchestrator, &config.targets, manual_rx, stopped(stop_rx)),
    );

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        cycles,
        manual_cycles,
        "target_watch stopped"
    );
    Ok(())
}

fn print_roster(targets: &[Target]) {
    for (category, batch) in group_by_category(targets) {
        println!("{} ({})", category.label(), batch.len());
        for target in batch {
            let extras = [
                target.stealth.then_some("stealth"),
                target.dynamic_content.as_ref().map(|_| "scrolls"),
            ];
            let extras: Vec<&str> = extras.into_iter().flatten().collect();
            if extras.is_empty() {
                println!("  {:<28} {}", target.name, target.url);
            } else {
                println!("  {:<28} {} [{}]", target.name, target.url, extras.join(", "));
            }
        }
    }
}

#[cfg(unix)]
fn install_manual_trigger(requests: mpsc::Sender<()>) {
    match scheduler::manual_trigger_on_sigusr1(requests) {
        Ok(()) => info!(pid = std::process::id(), "Send SIGUSR1 to run a cycle now"),
        Err(e) => warn!(error = %e, "Manual trigger unavailable"),
    }
}

#[cfg(not(unix))]
fn install_manual_trigger(_requests: mpsc::Sender<()>) {
    warn!("Manual trigger needs SIGUSR1; unavailable on this platform");
}
