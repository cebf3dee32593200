//! # refresh-sync
//!
//! Keeps a managed knowledge index in step with freshly staged content.
//!
//! - [`PartitionCatalog`] lists the partitions registered against an index
//! - [`IngestionDriver`] runs one re-index job to a terminal state
//! - [`SequentialScheduler`] drives every partition, one at a time
//! - [`RotationManager`] prepares the index, creates an alias and repoints
//!   the consumer
//!
//! External services sit behind [`KnowledgeIndexClient`] and
//! [`ConsumerConfigStore`], with HTTP, file and in-memory implementations.

pub mod catalog;
pub mod client;
pub mod consumer;
pub mod driver;
pub mod http;
pub mod memory;
pub mod poll;
pub mod rotation;
pub mod scheduler;

pub use catalog::PartitionCatalog;
pub use client::{JobHandle, JobStatus, KnowledgeIndexClient, KnowledgeIndexError};
pub use consumer::{
    ConsumerConfigError, ConsumerConfigStore, FileConsumerConfigStore,
    InMemoryConsumerConfigStore, VersionedConfig,
};
pub use driver::IngestionDriver;
pub use http::{HttpClientConfig, HttpKnowledgeIndexClient};
pub use memory::{InMemoryKnowledgeIndex, JobScript, PollStep};
pub use poll::PollSchedule;
pub use rotation::{RotationError, RotationManager, RotationOutcome};
pub use scheduler::{job_description, SequentialScheduler};
