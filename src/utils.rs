//! Small string and filesystem helpers.
//!
//! - String truncation for logs and notifications
//! - Slugs for file names and hashtags for notifications
//! - Output directory validation

use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

use crate::error::PersistenceError;

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` characters and get an ellipsis and a count of
/// the characters dropped.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max).collect();
        format!("{kept}…(+{} chars)", total - max)
    }
}

/// Shorten `s` to at most `max` characters, marking the cut with `...`.
pub fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max).collect();
        format!("{}...", kept.trim_end())
    }
}

/// Convert a name to a file-name friendly slug.
///
/// Lowercases, drops anything that is not alphanumeric and joins the
/// remaining words with single hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("SEC (US)"), "sec-us");
/// assert_eq!(slugify("Reuters  Business"), "reuters-business");
/// ```
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Hashtag for a source name: alphanumerics only, case kept.
pub fn hashtag(name: &str) -> String {
    let tag: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
    format!("#{tag}")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] if the directory cannot be created or is
/// not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).await.map_err(io_err)?;

    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path).map_err(io_err)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
