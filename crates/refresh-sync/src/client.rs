//! Knowledge-index service interface.

use async_trait::async_trait;
use thiserror::Error;

use refresh_types::{JobState, Partition, PrepareStatus};

/// Errors from the knowledge-index service.
#[derive(Debug, Error)]
pub enum KnowledgeIndexError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Failed to parse service response: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl KnowledgeIndexError {
    /// Whether the failure is a transport or capacity problem that may go
    /// away on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            KnowledgeIndexError::Http(_) | KnowledgeIndexError::RateLimited => true,
            KnowledgeIndexError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Job accepted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobState,
}

/// One observation of a job's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Failure reasons reported by the service, or the raw value of a
    /// status we do not recognize
    pub detail: Option<String>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            detail: None,
        }
    }

    pub fn with_detail(state: JobState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: Some(detail.into()),
        }
    }
}

/// Managed knowledge-index service.
///
/// Covers the job API (partition listing, job start, job status) and the
/// lifecycle API (prepare, alias creation). The service accepts at most one
/// active ingestion job per knowledge index.
#[async_trait]
pub trait KnowledgeIndexClient: Send + Sync {
    /// Partitions registered against the index, in service order.
    async fn list_partitions(&self, index_id: &str)
        -> Result<Vec<Partition>, KnowledgeIndexError>;

    /// Start one ingestion job for a partition.
    async fn start_job(
        &self,
        index_id: &str,
        partition_id: &str,
        description: &str,
    ) -> Result<JobHandle, KnowledgeIndexError>;

    async fn get_job_status(
        &self,
        index_id: &str,
        partition_id: &str,
        job_id: &str,
    ) -> Result<JobStatus, KnowledgeIndexError>;

    /// Materialize a servable snapshot from the synced partitions.
    async fn prepare(&self, index_id: &str) -> Result<PrepareStatus, KnowledgeIndexError>;

    /// Create a new alias and return its id.
    async fn create_alias(&self, index_id: &str, name: &str)
        -> Result<String, KnowledgeIndexError>;
}
