//! Command-line interface definitions for Target Watch.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials and the render service can also come from environment variables.

use crate::config::DEFAULT_CONFIG_PATH;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Target Watch application.
///
/// Without `--once`, `--target` or `--list` the process stays up and runs a
/// full cycle on the configured schedule until interrupted.
///
/// # Examples
///
/// ```sh
/// # Run on the schedule from config/targets.yaml
/// target_watch
///
/// # One full pass, records under ./out
/// target_watch --once -o ./out
///
/// # A single target, with Telegram alerts
/// TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=... target_watch -t "SEC (US)"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the target roster (YAML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory receiving one JSON record per job
    #[arg(short, long, default_value = "./data")]
    pub output_dir: PathBuf,

    /// Run a single full cycle and exit
    #[arg(long, conflicts_with = "target")]
    pub once: bool,

    /// Run one target by name and exit
    #[arg(short, long)]
    pub target: Option<String>,

    /// Print the validated roster and exit
    #[arg(long)]
    pub list: bool,

    /// Browserless-compatible render service; overrides `browser.render_endpoint`
    #[arg(long, env = "RENDER_ENDPOINT")]
    pub render_endpoint: Option<String>,

    /// Token for the render service
    #[arg(long, env = "RENDER_TOKEN", hide_env_values = true)]
    pub render_token: Option<String>,

    /// Telegram bot token; notifications go to the log when unset
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat receiving notifications
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Bot API host, for self-hosted Telegram Bot API servers
    #[arg(long, env = "TELEGRAM_API_URL")]
    pub telegram_api_url: Option<String>,
}
