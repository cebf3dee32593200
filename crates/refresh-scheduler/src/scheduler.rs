//! Scheduler service around tokio-cron-scheduler.
//!
//! Every job registered through [`SchedulerService::register_job`] runs
//! through one guarded path, whether fired by its cron trigger or by
//! [`SchedulerService::trigger`]:
//!
//! 1. claim the overlap guard, or record a skip and return
//! 2. wait out the jitter delay
//! 3. run the job under its timeout
//! 4. record the result in the registry

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::parse_tz;
use crate::{
    JitterConfig, JobOutput, JobRegistry, JobResult, OverlapGuard, OverlapPolicy,
    SchedulerConfig, SchedulerError, TimeoutConfig,
};

const SKIP_OVERLAP: &str = "previous run still active";
const SKIP_SHUTDOWN: &str = "scheduler shutting down";

/// Validate a 6-field cron expression (sec min hour day-of-month month
/// day-of-week).
///
/// ```
/// use refresh_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 3 * * *").is_ok());
/// assert!(validate_cron_expression("daily").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{expr}': {e}")))
}

type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutput, String>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A registered job with its execution policy.
struct GuardedJob {
    name: String,
    guard: OverlapGuard,
    jitter: JitterConfig,
    timeout: TimeoutConfig,
    registry: Arc<JobRegistry>,
    shutdown: CancellationToken,
    job_fn: JobFn,
}

impl GuardedJob {
    async fn execute(&self) -> JobResult {
        let Some(_run) = self.guard.try_acquire() else {
            warn!(job = %self.name, "Trigger skipped: {SKIP_OVERLAP}");
            self.registry.record_skip(&self.name, SKIP_OVERLAP);
            return JobResult::Skipped(SKIP_OVERLAP.to_string());
        };

        let jitter = self.jitter.generate_jitter();
        if !jitter.is_zero() {
            tracing::debug!(
                job = %self.name,
                jitter_ms = jitter.as_millis() as u64,
                "Delaying run"
            );
            tokio::select! {
                _ = tokio::time::sleep(jitter) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
        if self.shutdown.is_cancelled() {
            self.registry.record_skip(&self.name, SKIP_SHUTDOWN);
            return JobResult::Skipped(SKIP_SHUTDOWN.to_string());
        }

        info!(job = %self.name, "Job started");
        self.registry.record_start(&self.name);
        let started = tokio::time::Instant::now();

        let run = (self.job_fn)();
        let outcome = match self.timeout.duration() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
            },
            None => run.await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (result, output) = match outcome {
            Ok(output) => {
                info!(job = %self.name, duration_ms, "Job completed");
                (JobResult::Success, output)
            }
            Err(message) => {
                warn!(job = %self.name, duration_ms, error = %message, "Job failed");
                (JobResult::Failed(message), JobOutput::new())
            }
        };
        self.registry
            .record_complete_with_output(&self.name, result.clone(), duration_ms, output);
        result
    }
}

/// Owns the cron scheduler, the job registry, and the shutdown token.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
    registry: Arc<JobRegistry>,
    jobs: RwLock<HashMap<String, Arc<GuardedJob>>>,
}

impl SchedulerService {
    /// Create a stopped scheduler. Fails on an unknown default timezone.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
            registry: Arc::new(JobRegistry::new()),
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Stop firing triggers and wait for a running job to finish.
    ///
    /// Cancels the shutdown token so pending jitter delays end without
    /// running, then waits up to `shutdown_timeout_secs` for in-flight runs.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.registry.get_all_status().iter().any(|s| s.is_running) {
            if tokio::time::Instant::now() >= deadline {
                warn!("Shutdown timeout reached with a job still running");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Register a cron job.
    ///
    /// `timezone` falls back to the configured default. Job names are
    /// unique. Returns the id assigned by the cron scheduler.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_job<F, Fut, T>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        jitter: JitterConfig,
        timeout: TimeoutConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
        T: Into<JobOutput> + Send + 'static,
    {
        let tz: Tz = match timezone {
            Some(name) => parse_tz(name)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;
        if self.registry.is_registered(name) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let job_fn: JobFn = Arc::new(move || {
            let run = job_fn();
            Box::pin(async move { run.await.map(Into::into) }) as JobFuture
        });
        let guarded = Arc::new(GuardedJob {
            name: name.to_string(),
            guard: OverlapGuard::new(overlap),
            jitter,
            timeout,
            registry: self.registry.clone(),
            shutdown: self.shutdown_token.clone(),
            job_fn,
        });

        let fired = guarded.clone();
        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let job = fired.clone();
            Box::pin(async move {
                job.execute().await;
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        self.registry.register(name, cron_expr);
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), guarded);

        info!(
            job = %name,
            uuid = %uuid,
            cron = %cron_expr,
            timezone = %tz.name(),
            ?overlap,
            "Job registered"
        );
        Ok(uuid)
    }

    /// Run a registered job now, outside its schedule.
    ///
    /// Shares the job's overlap guard, so a manual trigger during a
    /// scheduled run is skipped the same way.
    pub async fn trigger(&self, name: &str) -> Result<JobResult, SchedulerError> {
        let job = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        info!(job = %name, "Manual trigger");
        Ok(job.execute().await)
    }

    /// Parse an IANA timezone name.
    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        parse_tz(tz_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduler_start_stop() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        let token = scheduler.shutdown_token();
        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(token.is_cancelled());
        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_default_timezone() {
        let config = SchedulerConfig::default().with_timezone("Invalid/Zone");
        assert!(matches!(
            SchedulerService::new(config).await,
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 3 * * *").is_ok());
        assert!(validate_cron_expression("*/10 * * * * *").is_ok());
        assert!(validate_cron_expression("0 0 0 * * SUN").is_ok());
        assert!(validate_cron_expression("").is_err());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_rejects_bad_input() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();

        let bad_cron = scheduler
            .register_job(
                "j",
                "whenever",
                None,
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                || async { Ok::<(), String>(()) },
            )
            .await;
        assert!(matches!(bad_cron, Err(SchedulerError::InvalidCron(_))));

        let bad_tz = scheduler
            .register_job(
                "j",
                "0 0 3 * * *",
                Some("Nowhere/City"),
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                || async { Ok::<(), String>(()) },
            )
            .await;
        assert!(matches!(bad_tz, Err(SchedulerError::InvalidTimezone(_))));
        assert_eq!(scheduler.registry().job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_duplicate_name() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let register = || {
            scheduler.register_job(
                "refresh",
                "0 0 3 * * *",
                Some("America/New_York"),
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                || async { Ok::<(), String>(()) },
            )
        };
        let uuid = register().await.unwrap();
        assert!(!uuid.is_nil());
        assert!(matches!(
            register().await,
            Err(SchedulerError::DuplicateJob(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_records_success_and_failure() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        scheduler
            .register_job(
                "flaky",
                "0 0 3 * * *",
                None,
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Ok(JobOutput::new().with_metadata("attempt", "1"))
                        } else {
                            Err("sync failed".to_string())
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(scheduler.trigger("flaky").await.unwrap(), JobResult::Success);
        assert_eq!(
            scheduler.trigger("flaky").await.unwrap(),
            JobResult::Failed("sync failed".to_string())
        );

        let status = scheduler.registry().get_status("flaky").unwrap();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.error_count, 1);
        assert!(!status.is_running);
        assert!(matches!(
            scheduler.trigger("missing").await,
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_trigger_is_skipped() {
        let scheduler = Arc::new(SchedulerService::new(quick_config()).await.unwrap());
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicU32::new(0));

        let (gate, counter) = (release.clone(), runs.clone());
        scheduler
            .register_job(
                "refresh",
                "0 0 3 * * *",
                None,
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                move || {
                    let (gate, counter) = (gate.clone(), counter.clone());
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<(), String>(())
                    }
                },
            )
            .await
            .unwrap();

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.trigger("refresh").await })
        };
        while !scheduler.registry().is_running("refresh") {
            tokio::task::yield_now().await;
        }

        let second = scheduler.trigger("refresh").await.unwrap();
        assert_eq!(second, JobResult::Skipped(SKIP_OVERLAP.to_string()));
        assert_eq!(
            scheduler.registry().get_status("refresh").unwrap().skip_count,
            1
        );

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), JobResult::Success);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let status = scheduler.registry().get_status("refresh").unwrap();
        assert_eq!(status.run_count, 1);
        assert_eq!(status.last_result, Some(JobResult::Success));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_timeout_records_failure() {
        let scheduler = SchedulerService::new(quick_config()).await.unwrap();
        scheduler
            .register_job(
                "stuck",
                "0 0 3 * * *",
                None,
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::new(1),
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<(), String>(())
                },
            )
            .await
            .unwrap();

        let result = scheduler.trigger("stuck").await.unwrap();
        assert_eq!(result, JobResult::Failed("timed out after 1s".to_string()));
        assert!(!scheduler.registry().is_running("stuck"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_after_shutdown_is_skipped() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        scheduler
            .register_job(
                "refresh",
                "0 0 3 * * *",
                None,
                OverlapPolicy::Skip,
                JitterConfig::none(),
                TimeoutConfig::none(),
                || async { Ok::<(), String>(()) },
            )
            .await
            .unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();

        let result = scheduler.trigger("refresh").await.unwrap();
        assert_eq!(result, JobResult::Skipped(SKIP_SHUTDOWN.to_string()));
    }

    #[test]
    fn test_timezone_parsing() {
        assert!(SchedulerService::parse_timezone("UTC").is_ok());
        assert!(SchedulerService::parse_timezone("Europe/London").is_ok());
        assert!(matches!(
            SchedulerService::parse_timezone("Invalid/Zone"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }
}
