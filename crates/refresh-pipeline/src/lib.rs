//! # refresh-pipeline
//!
//! The three-stage refresh pipeline:
//!
//! 1. **Extract** pulls paginated content into raw blob files
//! 2. **Transform** turns raw records into chunked knowledge documents
//! 3. **Sync** re-indexes every partition and rotates the serving alias
//!
//! [`PipelineRunner`] drives the stages in order under a run-level timeout
//! and produces a [`refresh_types::RunReport`].

pub mod blob;
pub mod error;
pub mod extract;
pub mod runner;
pub mod stage;
pub mod sync_stage;
pub mod transform;

use std::sync::Arc;

pub use blob::{BlobError, BlobStore};
pub use error::StageError;
pub use extract::{HttpExtractor, SourceExtract};
pub use runner::{load_last_report, PipelineRunner, RunState, RunnerConfig};
pub use stage::{RunContext, StageOutput, StageTask};
pub use sync_stage::{SyncStage, SyncStageDetail};
pub use transform::{ChunkingTransformer, Document, SourceTransform};

use refresh_sync::{
    ConsumerConfigStore, IngestionDriver, KnowledgeIndexClient, PartitionCatalog, PollSchedule,
    RotationManager, SequentialScheduler,
};
use refresh_types::Settings;

/// Wire a runner from settings and the two external services.
pub fn runner_from_settings(
    settings: &Settings,
    client: Arc<dyn KnowledgeIndexClient>,
    consumers: Arc<dyn ConsumerConfigStore>,
    blob: Arc<BlobStore>,
) -> Result<PipelineRunner, StageError> {
    let blob_settings = &settings.blob;

    let extract = HttpExtractor::new(
        settings.extract.clone(),
        settings.sources.clone(),
        blob.clone(),
        blob_settings.raw_prefix.clone(),
    )?;
    let transform = ChunkingTransformer::new(
        settings.sources.clone(),
        blob.clone(),
        blob_settings.raw_prefix.clone(),
        blob_settings.chunk_prefix.clone(),
    );

    let index_id = settings.knowledge_index_id.clone();
    let driver = IngestionDriver::new(
        client.clone(),
        index_id.clone(),
        PollSchedule::from(&settings.ingestion),
    );
    let sync = SyncStage::new(
        blob.clone(),
        blob_settings.chunk_prefix.clone(),
        PartitionCatalog::new(client.clone(), index_id),
        SequentialScheduler::new(driver),
        RotationManager::new(
            client,
            consumers,
            settings.consumer.alias_key.clone(),
            settings.pipeline.alias_prefix.clone(),
        ),
        settings.consumer.id.clone(),
    )
    .with_empty_catalog(settings.pipeline.empty_catalog);

    Ok(PipelineRunner::new(
        Arc::new(extract),
        Arc::new(transform),
        Arc::new(sync),
        RunnerConfig::from(&settings.pipeline),
    )
    .with_report_sink(blob, blob_settings.report_key.clone()))
}
