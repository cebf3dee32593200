//! Per-run time limit for scheduled jobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum wall time for one run of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Seconds before the run is abandoned; `None` or 0 means unbounded.
    pub timeout_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs: Some(timeout_secs),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
