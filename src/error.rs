//! Error taxonomy for the scraping pipeline.
//!
//! - [`ConfigError`]: an invalid roster or settings file. Fatal at startup.
//! - [`BrowserError`]: a failure reported by the extraction host.
//! - [`ExtractionError`]: a [`BrowserError`] tagged with the target it happened on.
//!   Retried by the orchestrator, never propagated past it.
//! - [`PersistenceError`] and [`NotificationError`]: collaborator failures. Logged,
//!   they never change a job's outcome.
//!
//! A title rejected by the validity filter is not an error; see
//! [`crate::normalize::normalize`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The roster or settings file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no targets configured")]
    NoTargets,

    #[error("target {0:?} is defined more than once")]
    DuplicateName(String),

    #[error("target {target:?} has no title selectors")]
    EmptyTitleSelectors { target: String },

    #[error("target {target:?} has dedup threshold {threshold}, expected a value in [0, 1]")]
    InvalidThreshold { target: String, threshold: f64 },

    #[error("target {target:?} has min_length {min} greater than max_length {max}")]
    InvalidLengthBounds {
        target: String,
        min: usize,
        max: usize,
    },

    #[error("target {target:?} has an invalid url {url:?}: {reason}")]
    InvalidUrl {
        target: String,
        url: String,
        reason: String,
    },

    #[error("target {target:?} has an invalid CSS selector {selector:?}")]
    InvalidSelector { target: String, selector: String },

    #[error("target {target:?} has an invalid excluded pattern {pattern:?}: {reason}")]
    InvalidPattern {
        target: String,
        pattern: String,
        reason: String,
    },

    #[error("orchestrator.max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Failure reported by a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("could not start session: {0}")]
    Launch(String),

    #[error("network error while loading {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("render service error (status {status}): {message}")]
    Render { status: u16, message: String },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("invalid selector {0:?}")]
    Selector(String),

    #[error("no page loaded")]
    NoPage,
}

impl BrowserError {
    /// Builds a [`BrowserError`] from a transport failure on `url`, keeping
    /// timeouts distinguishable from other network errors.
    pub fn from_reqwest(url: &str, err: reqwest::Error, after: Duration) -> Self {
        if err.is_timeout() {
            BrowserError::Timeout {
                what: format!("navigation to {url}"),
                after,
            }
        } else if let Some(status) = err.status() {
            BrowserError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            BrowserError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Extraction of one target failed before any candidates were read.
#[derive(Debug, Error)]
#[error("extraction failed for {target}: {cause}")]
pub struct ExtractionError {
    pub target: String,
    #[source]
    pub cause: BrowserError,
}

impl ExtractionError {
    pub fn new(target: impl Into<String>, cause: BrowserError) -> Self {
        Self {
            target: target.into(),
            cause,
        }
    }
}

/// The persistence collaborator could not record a job outcome.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The notification collaborator could not deliver a message.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification request failed: {0}")]
    Transport(String),

    #[error("notification endpoint answered with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Transport(err.to_string())
    }
}
