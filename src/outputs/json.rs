//! JSON record store.
//!
//! Each job outcome becomes one pretty-printed file:
//! `{root}/{YYYY-MM-DD}/{source-slug}-{HHMMSS.mmm}.json` (UTC).

use super::ItemStore;
use crate::error::PersistenceError;
use crate::models::{Category, JobStatus, NormalizedItem};
use crate::utils::slugify;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// On-disk shape of one job outcome.
#[derive(Debug, Serialize)]
struct ScrapeRecord<'a> {
    source: &'a str,
    category: Category,
    status: JobStatus,
    item_count: usize,
    items: &'a [NormalizedItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the record for `source_name` written at `at` goes.
    pub fn record_path(&self, source_name: &str, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(at.format("%Y-%m-%d").to_string())
            .join(format!("{}-{}.json", slugify(source_name), at.format("%H%M%S%.3f")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ItemStore for JsonStore {
    #[instrument(level = "info", skip_all, fields(source = %source_name, status = %status))]
    async fn store(
        &self,
        source_name: &str,
        category: Category,
        items: &[NormalizedItem],
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let created_at = Utc::now();
        let record = ScrapeRecord {
            source: source_name,
            category,
            status,
            item_count: items.len(),
            items,
            error_message,
            created_at,
        };
        let json = serde_json::to_string_pretty(&record)?;

        let path = self.record_path(source_name, created_at);
        if let Some(dir) = path.parent() {
            debug!(dir = %dir.display(), "Ensuring record directory exists");
            fs::create_dir_all(dir)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        fs::write(&path, json)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), items = items.len(), "Wrote job record");
        Ok(())
    }
}
