//! Persistence of job outcomes.
//!
//! The orchestrator hands every terminal outcome (except skipped runs) to an
//! [`ItemStore`]. Failures are logged by the caller and never change the
//! outcome.
//!
//! # Submodules
//!
//! - [`json`]: one JSON record per job, grouped by date
//!
//! # Output Structure
//!
//! ```text
//! data/
//! └── 2025-05-06/
//!     ├── sec-us-093012.418.json
//!     └── coindesk-094501.027.json
//! ```

pub mod json;

use crate::error::PersistenceError;
use crate::models::{Category, JobStatus, NormalizedItem};

/// Records the outcome of one job.
pub trait ItemStore {
    async fn store(
        &self,
        source_name: &str,
        category: Category,
        items: &[NormalizedItem],
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), PersistenceError>;
}
