//! # refresh-types
//!
//! Shared domain types for the knowledge refresh orchestrator.
//!
//! This crate defines the data model used across the workspace:
//! - Partitions: content sources registered against a knowledge index
//! - Ingestion jobs: one re-index job per partition, polled to a terminal state
//! - Sync results: per-run aggregate of ingestion outcomes
//! - Serving aliases: immutable pointers to prepared index snapshots
//! - Run reports: the structured result of one pipeline execution
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use refresh_types::{JobState, SyncRunResult};
//!
//! let result = SyncRunResult::new();
//! assert!(result.is_noop());
//! assert!(JobState::Complete.is_terminal());
//! ```

pub mod alias;
pub mod config;
pub mod error;
pub mod job;
pub mod partition;
pub mod report;
pub mod sync;

pub use alias::{alias_name_for_run, PrepareOutcome, PrepareStatus, ServingAlias};
pub use config::{
    default_sources, ApiSettings, BlobBackend, BlobSettings, ConsumerSettings, EmptyCatalogPolicy,
    ExtractSettings, FieldSpec, IngestionSettings, PipelineSettings, ScheduleSettings, Settings,
    SourceSettings,
};
pub use error::RefreshError;
pub use job::{IngestionJob, JobState};
pub use partition::{Partition, PartitionStatus};
pub use report::{RunReport, RunStatus, Stage, StepOutcome, StepReport};
pub use sync::SyncRunResult;
