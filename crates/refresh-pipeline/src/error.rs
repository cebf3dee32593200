//! Stage errors.

use thiserror::Error;

use refresh_sync::{KnowledgeIndexError, RotationError};
use refresh_types::SyncRunResult;

use crate::blob::BlobError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Content source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid staged content: {0}")]
    InvalidContent(String),

    #[error("Failed to resolve partitions: {0}")]
    Catalog(#[source] KnowledgeIndexError),

    #[error("Rotation failed after {}: {source}", .sync.summary())]
    Rotation {
        sync: Box<SyncRunResult>,
        #[source]
        source: RotationError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StageError {
    /// Whether the stage may be re-run within the same pipeline run.
    ///
    /// A rotation failure is never transient here: re-running the sync stage
    /// would start every ingestion job again.
    pub fn is_transient(&self) -> bool {
        match self {
            StageError::Blob(e) => e.is_transient(),
            StageError::SourceUnavailable(_) => true,
            StageError::Catalog(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Structured payload for the run report.
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            StageError::Rotation { sync, source } => Some(serde_json::json!({
                "sync": sync,
                "rotation_error": source.to_string(),
                "pointer_untouched": source.pointer_untouched(),
                "requires_operator": source.requires_operator(),
            })),
            _ => None,
        }
    }
}
