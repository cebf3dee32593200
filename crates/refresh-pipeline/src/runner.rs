//! Pipeline stage runner.
//!
//! Drives Extract, Transform and Sync strictly in order under one run-level
//! timeout. Any stage failure moves the run to `Failed`; earlier stages are
//! not rolled back. Transient stage errors are retried with exponential
//! backoff up to the configured number of attempts.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use refresh_types::{PipelineSettings, RunReport, RunStatus, Stage, StepOutcome, StepReport};

use crate::blob::BlobStore;
use crate::error::StageError;
use crate::stage::{RunContext, StageTask};

/// Runner states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Extract,
    Transform,
    Sync,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Extract => Some(Stage::Extract),
            RunState::Transform => Some(Stage::Transform),
            RunState::Sync => Some(Stage::Sync),
            RunState::Succeeded | RunState::Failed => None,
        }
    }

    /// State after `stage` finishes.
    pub fn after(stage: Stage, succeeded: bool) -> RunState {
        if !succeeded {
            return RunState::Failed;
        }
        match stage.next() {
            Some(Stage::Transform) => RunState::Transform,
            Some(Stage::Sync) => RunState::Sync,
            Some(Stage::Extract) => RunState::Extract,
            None => RunState::Succeeded,
        }
    }
}

/// Runner limits.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub run_timeout: Duration,
    /// Attempts per stage for transient errors, including the first
    pub stage_max_attempts: u32,
    /// Initial delay between stage attempts
    pub retry_initial_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(3600),
            stage_max_attempts: 3,
            retry_initial_interval: Duration::from_secs(2),
        }
    }
}

impl From<&PipelineSettings> for RunnerConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            run_timeout: Duration::from_secs(settings.run_timeout_secs),
            stage_max_attempts: settings.stage_max_attempts.max(1),
            ..Default::default()
        }
    }
}

pub struct PipelineRunner {
    extract: Arc<dyn StageTask>,
    transform: Arc<dyn StageTask>,
    sync: Arc<dyn StageTask>,
    config: RunnerConfig,
    report_sink: Option<(Arc<BlobStore>, String)>,
}

impl PipelineRunner {
    pub fn new(
        extract: Arc<dyn StageTask>,
        transform: Arc<dyn StageTask>,
        sync: Arc<dyn StageTask>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            extract,
            transform,
            sync,
            config,
            report_sink: None,
        }
    }

    /// Persist every finished report to `key` in `blob`.
    pub fn with_report_sink(mut self, blob: Arc<BlobStore>, key: impl Into<String>) -> Self {
        self.report_sink = Some((blob, key.into()));
        self
    }

    fn task(&self, stage: Stage) -> &Arc<dyn StageTask> {
        match stage {
            Stage::Extract => &self.extract,
            Stage::Transform => &self.transform,
            Stage::Sync => &self.sync,
        }
    }

    /// Execute one full run and return its report.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::begin(Utc::now());
        let ctx = RunContext {
            run_id: report.run_id.clone(),
            run_at: report.started_at,
        };
        info!(run_id = %ctx.run_id, "Pipeline run started");

        let timed =
            tokio::time::timeout(self.config.run_timeout, self.drive(&ctx, &mut report)).await;

        match timed {
            Ok(RunState::Succeeded) => {
                let message = report
                    .steps
                    .last()
                    .map(|s| s.message.clone())
                    .unwrap_or_default();
                report.finish(RunStatus::Succeeded, message);
            }
            Ok(_) => {
                let message = report
                    .steps
                    .iter()
                    .find(|s| s.outcome == StepOutcome::Failed)
                    .map(|s| format!("{} failed: {}", s.stage, s.message))
                    .unwrap_or_else(|| "run failed".to_string());
                report.finish(RunStatus::Failed, message);
            }
            Err(_) => {
                let stage = Stage::ORDER
                    .get(report.steps.len())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "finish".to_string());
                report.finish(
                    RunStatus::TimedOut,
                    format!(
                        "run exceeded {}s during {}",
                        self.config.run_timeout.as_secs(),
                        stage
                    ),
                );
            }
        }

        match report.status {
            RunStatus::Succeeded => info!(
                run_id = %report.run_id,
                message = %report.message,
                "Pipeline run succeeded"
            ),
            _ => error!(
                run_id = %report.run_id,
                status = ?report.status,
                message = %report.message,
                "Pipeline run did not succeed"
            ),
        }

        self.persist(&report).await;
        report
    }

    /// Walk the state machine, pushing one step per stage reached.
    async fn drive(&self, ctx: &RunContext, report: &mut RunReport) -> RunState {
        let mut state = RunState::Extract;
        while let Some(stage) = state.stage() {
            let step = self.run_stage(stage, ctx).await;
            let succeeded = step.outcome != StepOutcome::Failed;
            report.push_step(step);
            state = RunState::after(stage, succeeded);
        }
        state
    }

    async fn run_stage(&self, stage: Stage, ctx: &RunContext) -> StepReport {
        let task = self.task(stage);
        let started = Instant::now();
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.retry_initial_interval,
            current_interval: self.config.retry_initial_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            info!(run_id = %ctx.run_id, stage = %stage, attempt = attempts, "Stage started");

            match task.execute(ctx).await {
                Ok(output) => {
                    info!(
                        stage = %stage,
                        outcome = ?output.outcome,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Stage finished"
                    );
                    return StepReport {
                        stage,
                        outcome: output.outcome,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        message: output.message,
                        detail: output.detail,
                    };
                }
                Err(e) => {
                    let retry = e.is_transient() && attempts < self.config.stage_max_attempts;
                    if retry {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!(
                                stage = %stage,
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "Stage failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    error!(stage = %stage, attempts, error = %e, "Stage failed");
                    return StepReport {
                        stage,
                        outcome: StepOutcome::Failed,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        message: e.to_string(),
                        detail: e.detail(),
                    };
                }
            }
        }
    }

    async fn persist(&self, report: &RunReport) {
        let Some((blob, key)) = &self.report_sink else {
            return;
        };
        let body = match report.to_json_pretty() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to serialize run report");
                return;
            }
        };
        if let Err(e) = blob.put(key, body).await {
            warn!(key = %key, error = %e, "Failed to persist run report");
        }
    }
}

/// Read the last persisted report, if any.
pub async fn load_last_report(
    blob: &BlobStore,
    key: &str,
) -> Result<Option<RunReport>, StageError> {
    match blob.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
