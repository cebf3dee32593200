//! Scheduler errors.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying cron scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InvalidCron("bad expression".to_string());
        assert!(err.to_string().contains("Invalid cron expression"));

        let err = SchedulerError::DuplicateJob("knowledge_refresh".to_string());
        assert!(err.to_string().contains("already registered"));

        assert!(SchedulerError::AlreadyRunning
            .to_string()
            .contains("already running"));
        assert!(SchedulerError::NotRunning.to_string().contains("not running"));
    }
}
