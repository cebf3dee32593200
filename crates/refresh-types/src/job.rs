//! Ingestion job records.
//!
//! An [`IngestionJob`] is created when a re-index job is started for one
//! partition and is mutated only by status polling. Once it reaches a
//! terminal [`JobState`] it never changes again, and it is never resumed by
//! a later run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::partition::Partition;

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the index service, not yet running
    Starting,
    /// Running
    InProgress,
    /// Finished successfully
    Complete,
    /// Finished unsuccessfully on the service side
    Failed,
    /// Stopped on the service side before finishing
    Stopped,
    /// The wall-clock budget elapsed before a terminal state was observed
    TimedOut,
    /// The job could not be started, or reported a state we do not understand
    Error,
}

impl JobState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Starting | JobState::InProgress)
    }

    /// Whether the job finished successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Complete)
    }

    /// Whether the job reached a terminal state other than `Complete`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Starting => "starting",
            JobState::InProgress => "in_progress",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
            JobState::TimedOut => "timed_out",
            JobState::Error => "error",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One re-index job for one partition within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub partition_id: String,
    /// Partition display name, for logs and reports
    pub partition_name: String,
    /// Service-assigned job id; absent when the job could not be started
    pub job_id: Option<String>,
    pub status: JobState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl IngestionJob {
    /// Record a job the service accepted.
    pub fn started(partition: &Partition, job_id: impl Into<String>, status: JobState) -> Self {
        let now = Utc::now();
        let mut job = Self {
            partition_id: partition.id.clone(),
            partition_name: partition.name.clone(),
            job_id: Some(job_id.into()),
            status: JobState::Starting,
            started_at: now,
            completed_at: None,
            error: None,
        };
        job.transition(status);
        job
    }

    /// Record a job whose start request failed.
    pub fn start_failed(partition: &Partition, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            partition_id: partition.id.clone(),
            partition_name: partition.name.clone(),
            job_id: None,
            status: JobState::Error,
            started_at: now,
            completed_at: Some(now),
            error: Some(error.into()),
        }
    }

    /// Apply a polled status.
    ///
    /// Returns `false` and leaves the record untouched if the job is
    /// already terminal.
    pub fn transition(&mut self, status: JobState) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Move to a terminal state and attach an error detail.
    pub fn terminate_with(&mut self, status: JobState, error: impl Into<String>) -> bool {
        if self.transition(status) {
            self.error = Some(error.into());
            true
        } else {
            false
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed wall-clock time, if the job has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}
