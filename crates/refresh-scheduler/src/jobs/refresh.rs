//! Daily knowledge refresh job.
//!
//! Each trigger runs the pipeline once. Overlapping triggers are skipped,
//! so at most one refresh is in flight per daemon.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use refresh_pipeline::PipelineRunner;
use refresh_types::{RunStatus, Settings};

use crate::{
    JitterConfig, JobOutput, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig,
};

pub const REFRESH_JOB_NAME: &str = "knowledge_refresh";

/// Grace period past the pipeline's own run timeout before the scheduler
/// abandons a run. The runner normally times out first and persists a
/// `timed_out` report.
const TIMEOUT_GRACE_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshJobConfig {
    /// Cron expression (default: "0 0 3 * * *" = 03:00 daily)
    pub cron: String,

    pub timezone: String,

    /// Max jitter in seconds (default: 0)
    pub jitter_secs: u64,

    /// Scheduler-side timeout in seconds (default: 3660)
    pub timeout_secs: u64,
}

impl Default for RefreshJobConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 3 * * *".to_string(),
            timezone: "UTC".to_string(),
            jitter_secs: 0,
            timeout_secs: 3600 + TIMEOUT_GRACE_SECS,
        }
    }
}

impl From<&Settings> for RefreshJobConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cron: settings.schedule.cron.clone(),
            timezone: settings.schedule.timezone.clone(),
            jitter_secs: settings.schedule.jitter_secs,
            timeout_secs: settings.pipeline.run_timeout_secs + TIMEOUT_GRACE_SECS,
        }
    }
}

/// Register the daily refresh with the scheduler.
///
/// A run that ends in anything but `succeeded` is recorded as a failed job
/// with the report's message.
pub async fn create_refresh_job(
    scheduler: &SchedulerService,
    runner: Arc<PipelineRunner>,
    config: RefreshJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let uuid = scheduler
        .register_job(
            REFRESH_JOB_NAME,
            &config.cron,
            Some(&config.timezone),
            OverlapPolicy::Skip,
            JitterConfig::new(config.jitter_secs),
            TimeoutConfig::new(config.timeout_secs),
            move || {
                let runner = runner.clone();
                async move {
                    let report = runner.run().await;
                    match report.status {
                        RunStatus::Succeeded => Ok(JobOutput::new()
                            .with_metadata("run_id", report.run_id)
                            .with_metadata("status", report.status.to_string())),
                        status => Err(format!(
                            "run {} {}: {}",
                            report.run_id, status, report.message
                        )),
                    }
                }
            },
        )
        .await?;

    info!(cron = %config.cron, timezone = %config.timezone, "Registered knowledge refresh job");
    Ok(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobResult, SchedulerConfig};
    use async_trait::async_trait;
    use refresh_pipeline::{RunContext, RunnerConfig, StageError, StageOutput, StageTask};
    use refresh_types::Stage;

    struct Fixed {
        stage: Stage,
        fail: bool,
    }

    #[async_trait]
    impl StageTask for Fixed {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
            if self.fail {
                Err(StageError::Config("no sources configured".into()))
            } else {
                Ok(StageOutput::succeeded("ok"))
            }
        }
    }

    fn runner(fail_sync: bool) -> Arc<PipelineRunner> {
        Arc::new(PipelineRunner::new(
            Arc::new(Fixed { stage: Stage::Extract, fail: false }),
            Arc::new(Fixed { stage: Stage::Transform, fail: false }),
            Arc::new(Fixed { stage: Stage::Sync, fail: fail_sync }),
            RunnerConfig::default(),
        ))
    }

    #[test]
    fn test_config_default() {
        let config = RefreshJobConfig::default();
        assert_eq!(config.cron, "0 0 3 * * *");
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.jitter_secs, 0);
        assert_eq!(config.timeout_secs, 3660);
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.schedule.cron = "0 30 2 * * *".to_string();
        settings.schedule.timezone = "Europe/Berlin".to_string();
        settings.pipeline.run_timeout_secs = 1200;

        let config = RefreshJobConfig::from(&settings);
        assert_eq!(config.cron, "0 30 2 * * *");
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.timeout_secs, 1260);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_successful_run_records_metadata() {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        create_refresh_job(&scheduler, runner(false), RefreshJobConfig::default())
            .await
            .unwrap();

        let result = scheduler.trigger(REFRESH_JOB_NAME).await.unwrap();
        assert_eq!(result, JobResult::Success);

        let status = scheduler.registry().get_status(REFRESH_JOB_NAME).unwrap();
        assert_eq!(
            status.last_run_metadata.get("status").map(String::as_str),
            Some("succeeded")
        );
        assert!(status.last_run_metadata.contains_key("run_id"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_run_records_failure() {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        create_refresh_job(&scheduler, runner(true), RefreshJobConfig::default())
            .await
            .unwrap();

        match scheduler.trigger(REFRESH_JOB_NAME).await.unwrap() {
            JobResult::Failed(message) => {
                assert!(message.contains("failed"));
                assert!(message.contains("sync"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let status = scheduler.registry().get_status(REFRESH_JOB_NAME).unwrap();
        assert_eq!(status.error_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_rejected() {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let config = RefreshJobConfig {
            cron: "every day".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_refresh_job(&scheduler, runner(false), config).await,
            Err(SchedulerError::InvalidCron(_))
        ));
    }
}
