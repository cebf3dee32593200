//! Content partitions registered against a knowledge index.

use serde::{Deserialize, Serialize};

/// Registration status of a partition as reported by the index service.
///
/// Informational only; the orchestrator syncs every partition the catalog
/// returns regardless of its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionStatus {
    Available,
    Deleting,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionStatus::Available => write!(f, "available"),
            PartitionStatus::Deleting => write!(f, "deleting"),
            PartitionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One content source (e.g. "events", "stores") registered against a
/// knowledge index.
///
/// Identity is `id`; `name` is carried for logging. Partitions are created
/// out-of-band and are read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: PartitionStatus,
}

impl Partition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PartitionStatus::Available,
        }
    }

    pub fn with_status(mut self, status: PartitionStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_identity_is_id() {
        let a = Partition::new("ds-1", "events");
        let b = Partition::new("ds-1", "events");
        assert_eq!(a, b);
        assert_eq!(a.status, PartitionStatus::Available);
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let json = r#"{"id":"ds-9","name":"faqs","status":"UPDATING"}"#;
        let partition: Partition = serde_json::from_str(json).unwrap();
        assert_eq!(partition.status, PartitionStatus::Unknown);
    }

    #[test]
    fn test_missing_status_defaults_to_unknown() {
        let json = r#"{"id":"ds-2","name":"stores"}"#;
        let partition: Partition = serde_json::from_str(json).unwrap();
        assert_eq!(partition.status, PartitionStatus::Unknown);
        assert_eq!(partition.name, "stores");
    }
}
