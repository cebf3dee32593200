//! Ready-made jobs for the refresh daemon.
//!
//! - **refresh**: the daily knowledge refresh, one pipeline run per trigger

pub mod refresh;

pub use refresh::{create_refresh_job, RefreshJobConfig, REFRESH_JOB_NAME};
