//! Scheduler service settings.

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Settings for the scheduler service itself, independent of any job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone used by jobs registered without one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Seconds that running jobs get to observe cancellation on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Use `timezone` as the default for jobs.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    /// Parse the default timezone.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` for an unknown identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        parse_tz(&self.default_timezone)
    }
}

pub(crate) fn parse_tz(name: &str) -> Result<chrono_tz::Tz, SchedulerError> {
    name.parse::<chrono_tz::Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}
