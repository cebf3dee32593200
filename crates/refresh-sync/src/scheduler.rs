//! Sequential scheduler.
//!
//! The knowledge-index service accepts one active ingestion job per index,
//! so partitions are driven strictly one after another. A partition that
//! fails is recorded and the loop moves on.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use refresh_types::{Partition, SyncRunResult};

use crate::driver::IngestionDriver;

/// Description attached to every job started in a run.
pub fn job_description(run_at: DateTime<Utc>) -> String {
    format!("scheduled refresh {}", run_at.to_rfc3339())
}

pub struct SequentialScheduler {
    driver: IngestionDriver,
}

impl SequentialScheduler {
    pub fn new(driver: IngestionDriver) -> Self {
        Self { driver }
    }

    /// Drive every partition once, in the given order.
    ///
    /// An empty list is a no-op and yields a result with `total == 0`.
    pub async fn sync_all(&self, partitions: &[Partition], run_at: DateTime<Utc>) -> SyncRunResult {
        let mut result = SyncRunResult::new();
        if partitions.is_empty() {
            info!("No partitions registered, nothing to sync");
            return result;
        }

        let description = job_description(run_at);
        for (position, partition) in partitions.iter().enumerate() {
            info!(
                partition = %partition.name,
                position = position + 1,
                total = partitions.len(),
                "Syncing partition"
            );
            let job = self.driver.run_ingestion(partition, &description).await;
            if job.status.is_failure() {
                warn!(
                    partition = %partition.name,
                    status = %job.status,
                    error = job.error.as_deref().unwrap_or(""),
                    "Partition sync did not complete"
                );
            }
            result.record(job);
        }

        info!(
            total = result.total,
            completed = result.completed,
            failed = result.failed,
            "Partition sync finished"
        );
        result
    }
}
