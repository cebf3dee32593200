//! Serving aliases and index preparation outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status returned by the index service when asked to prepare a servable
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareStatus {
    Prepared,
    Preparing,
    NotPrepared,
    Failed,
    #[serde(other)]
    Unknown,
}

impl PrepareStatus {
    /// Whether an alias may be created on top of this preparation.
    ///
    /// Statuses the service reports that we do not recognise are not servable.
    pub fn is_servable(&self) -> bool {
        matches!(self, PrepareStatus::Prepared | PrepareStatus::Preparing)
    }
}

impl std::fmt::Display for PrepareStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PrepareStatus::Prepared => "prepared",
            PrepareStatus::Preparing => "preparing",
            PrepareStatus::NotPrepared => "not_prepared",
            PrepareStatus::Failed => "failed",
            PrepareStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Recorded result of the prepare step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareOutcome {
    pub status: PrepareStatus,
    pub prepared_at: DateTime<Utc>,
}

/// An immutable, uniquely named pointer to one prepared snapshot of a
/// knowledge index. Never mutated; old aliases are left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingAlias {
    pub alias_id: String,
    pub alias_name: String,
    pub created_at: DateTime<Utc>,
}

/// Alias name for a run started at `run_at`, unique per second.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use refresh_types::alias_name_for_run;
///
/// let at = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 7).unwrap();
/// assert_eq!(alias_name_for_run("kb", at), "kb-20260301-030007");
/// ```
pub fn alias_name_for_run(prefix: &str, run_at: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, run_at.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_consecutive_daily_runs_get_distinct_names() {
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap();
        assert_ne!(
            alias_name_for_run("refresh", day1),
            alias_name_for_run("refresh", day2)
        );
    }

    #[test]
    fn test_prepare_status_servable() {
        assert!(PrepareStatus::Prepared.is_servable());
        assert!(PrepareStatus::Preparing.is_servable());
        assert!(!PrepareStatus::Failed.is_servable());
        assert!(!PrepareStatus::NotPrepared.is_servable());
        assert!(!PrepareStatus::Unknown.is_servable());
    }

    #[test]
    fn test_prepare_status_wire_format() {
        let status: PrepareStatus = serde_json::from_str("\"PREPARED\"").unwrap();
        assert_eq!(status, PrepareStatus::Prepared);
        let status: PrepareStatus = serde_json::from_str("\"VERSIONING\"").unwrap();
        assert_eq!(status, PrepareStatus::Unknown);
    }
}
