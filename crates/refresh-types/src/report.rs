//! Structured run reports.
//!
//! A [`RunReport`] is the only output surface of a pipeline run. It is
//! consumed by operational logging and persisted so `status` can show the
//! most recent run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Sync,
}

impl Stage {
    /// All stages, in the order they run.
    pub const ORDER: [Stage; 3] = [Stage::Extract, Stage::Transform, Stage::Sync];

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Extract => Some(Stage::Transform),
            Stage::Transform => Some(Stage::Sync),
            Stage::Sync => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Transform => write!(f, "transform"),
            Stage::Sync => write!(f, "sync"),
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// The stage ran but found nothing to do
    NoData,
    Failed,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::NoData => "no_data",
            StepOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Report for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub stage: Stage,
    pub outcome: StepOutcome,
    /// Attempts made, including the first
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub message: String,
    /// Stage-specific payload (extraction counts, sync result, alias)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Structured result of one pipeline run: `{status, message, steps}` plus
/// identifiers and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
    pub steps: Vec<StepReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Begin a report for a run starting at `started_at`.
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Ulid::new().to_string(),
            status: RunStatus::Running,
            message: String::new(),
            steps: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn push_step(&mut self, step: StepReport) {
        self.steps.push(step);
    }

    pub fn finish(&mut self, status: RunStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.finished_at = Some(Utc::now());
    }

    pub fn step(&self, stage: Stage) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.stage == stage)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
