//! Aggregate outcome of one sequential sync over all partitions.

use serde::{Deserialize, Serialize};

use crate::job::IngestionJob;

/// Per-run aggregate of ingestion outcomes.
///
/// Built incrementally as each partition finishes. `completed + failed`
/// always equals `total`, and `jobs` holds exactly one record per partition
/// in the order the partitions were attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub jobs: Vec<IngestionJob>,
}

impl SyncRunResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal outcome of one partition.
    pub fn record(&mut self, job: IngestionJob) {
        self.total += 1;
        if job.status.is_success() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.jobs.push(job);
    }

    /// No partitions were registered, so nothing was attempted.
    pub fn is_noop(&self) -> bool {
        self.total == 0
    }

    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        if self.is_noop() {
            return "no partitions registered".to_string();
        }
        format!(
            "{} of {} partitions completed, {} failed",
            self.completed, self.total, self.failed
        )
    }
}
