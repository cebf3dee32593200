//! Scheduling for the knowledge refresh daemon.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware cron triggers, graceful
//! shutdown, and a guarded execution path shared by every registered job:
//!
//! - an [`OverlapGuard`] so a trigger that fires while the previous run is
//!   still active is skipped and recorded, never run concurrently
//! - optional [`JitterConfig`] delay before each run
//! - a [`TimeoutConfig`] bound on each run
//! - per-job status in a [`JobRegistry`]
//!
//! # Example
//!
//! ```ignore
//! use refresh_scheduler::{
//!     JitterConfig, OverlapPolicy, SchedulerConfig, SchedulerService, TimeoutConfig,
//! };
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler.register_job(
//!     "knowledge_refresh",
//!     "0 0 3 * * *",
//!     Some("UTC"),
//!     OverlapPolicy::Skip,
//!     JitterConfig::none(),
//!     TimeoutConfig::new(3660),
//!     || async { run_pipeline().await },
//! ).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod jitter;
mod overlap;
mod registry;
mod scheduler;
mod timeout;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::{with_jitter, JitterConfig};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
pub use timeout::TimeoutConfig;
