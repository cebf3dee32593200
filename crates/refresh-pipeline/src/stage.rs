//! The unit of work the runner drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use refresh_types::{Stage, StepOutcome};

use crate::error::StageError;

/// Identity of the run a stage executes in.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub run_at: DateTime<Utc>,
}

/// What a stage reports back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub outcome: StepOutcome,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl StageOutput {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Succeeded,
            message: message.into(),
            detail: None,
        }
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::NoData,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageTask: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, StageError>;
}
