//! Job status tracking.
//!
//! Every trigger of a registered job ends in exactly one recorded result:
//! success, failure, or skip. `status` commands and tests read it back
//! through [`JobRegistry::get_status`].

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// Not executed, with the reason (overlap, shutdown)
    Skipped(String),
}

/// Metadata a job reports about a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub metadata: HashMap<String, String>,
}

impl From<()> for JobOutput {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Status of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    /// When the last executed run finished
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    /// Result of the last trigger, skips included
    pub last_result: Option<JobResult>,
    /// Executed runs; skipped triggers are not counted
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
    pub is_running: bool,
    #[serde(default)]
    pub last_run_metadata: HashMap<String, String>,
}

impl JobStatus {
    pub fn new(job_name: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            cron_expr: cron_expr.into(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
            is_running: false,
            last_run_metadata: HashMap::new(),
        }
    }
}

/// Thread-safe map of job name to [`JobStatus`].
///
/// A poisoned lock is recovered rather than propagated: the map holds plain
/// counters that stay consistent even if a writer panicked.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, job_name: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = self.write().get_mut(job_name) {
            f(status);
        }
    }

    /// Register a job, replacing any previous status under the same name.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        self.write()
            .insert(job_name.to_string(), JobStatus::new(job_name, cron_expr));
    }

    pub fn record_start(&self, job_name: &str) {
        self.update(job_name, |s| s.is_running = true);
    }

    /// Record a finished run.
    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        self.record_complete_with_output(job_name, result, duration_ms, JobOutput::new());
    }

    pub fn record_complete_with_output(
        &self,
        job_name: &str,
        result: JobResult,
        duration_ms: u64,
        output: JobOutput,
    ) {
        self.update(job_name, |s| {
            s.is_running = false;
            s.last_run = Some(Utc::now());
            s.last_duration_ms = Some(duration_ms);
            s.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                s.error_count += 1;
            }
            s.last_result = Some(result);
            s.last_run_metadata = output.metadata;
        });
    }

    /// Record a trigger that did not execute.
    ///
    /// Leaves `is_running` and the run counters alone, since the run that
    /// caused the skip may still be in progress.
    pub fn record_skip(&self, job_name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(job_name, |s| {
            s.skip_count += 1;
            s.last_result = Some(JobResult::Skipped(reason));
        });
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All statuses, sorted by job name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read()
            .get(job_name)
            .map(|s| s.is_running)
            .unwrap_or(false)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}
