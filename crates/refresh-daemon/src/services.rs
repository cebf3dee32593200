//! Builds a pipeline runner from settings.
//!
//! The live wiring talks to the configured knowledge-index service, the
//! file-backed consumer config store, and the configured blob backend. The
//! dry-run wiring keeps content extraction but swaps the rest for in-memory
//! doubles, so nothing outside the process changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use refresh_pipeline::{runner_from_settings, BlobStore, PipelineRunner};
use refresh_sync::{
    FileConsumerConfigStore, HttpClientConfig, HttpKnowledgeIndexClient,
    InMemoryConsumerConfigStore, InMemoryKnowledgeIndex, JobScript,
};
use refresh_types::{BlobBackend, Partition, Settings};

/// Wire the runner against the real collaborators.
pub fn live_runner(settings: &Settings) -> Result<PipelineRunner> {
    let client = HttpKnowledgeIndexClient::new(HttpClientConfig::from(&settings.api))
        .context("Failed to build knowledge-index client")?;
    let consumers = FileConsumerConfigStore::new(settings.expanded_consumer_dir());
    let blob = BlobStore::from_settings(settings).context("Failed to open blob store")?;
    info!(
        index = %settings.knowledge_index_id,
        consumer = %settings.consumer.id,
        blob = %blob.describe(),
        "Wiring live services"
    );

    runner_from_settings(
        settings,
        Arc::new(client),
        Arc::new(consumers),
        Arc::new(blob),
    )
    .context("Failed to build pipeline")
}

/// Settings adjusted for a dry run: in-memory blobs, fast polling, and
/// placeholder identifiers where none are configured.
pub fn dry_run_settings(settings: &Settings) -> Settings {
    let mut dry = settings.clone();
    dry.blob.backend = BlobBackend::Memory;
    dry.ingestion.poll_interval_secs = 1;
    dry.ingestion.job_timeout_secs = 10;
    if dry.knowledge_index_id.trim().is_empty() {
        dry.knowledge_index_id = "dry-run-index".to_string();
    }
    if dry.consumer.id.trim().is_empty() {
        dry.consumer.id = "dry-run-consumer".to_string();
    }
    dry
}

/// Wire the runner against in-memory doubles, one partition per source.
///
/// Returns the knowledge-index double so callers can inspect the jobs and
/// aliases a run produced.
pub fn dry_run_runner(
    settings: &Settings,
) -> Result<(PipelineRunner, Arc<InMemoryKnowledgeIndex>)> {
    let index = settings
        .sources
        .iter()
        .fold(InMemoryKnowledgeIndex::new(), |index, source| {
            index.with_partition(
                Partition::new(format!("dry-{}", source.name), source.name.clone()),
                JobScript::completes_after(1),
            )
        });
    let index = Arc::new(index);
    let blob = BlobStore::from_settings(settings).context("Failed to open blob store")?;
    info!(partitions = settings.sources.len(), "Wiring dry-run services");

    let runner = runner_from_settings(
        settings,
        index.clone(),
        Arc::new(InMemoryConsumerConfigStore::new()),
        Arc::new(blob),
    )
    .context("Failed to build pipeline")?;
    Ok((runner, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_settings_isolate_side_effects() {
        let mut settings = Settings::default();
        settings.blob.backend = BlobBackend::S3;
        settings.blob.bucket = Some("prod-bucket".to_string());

        let dry = dry_run_settings(&settings);
        assert_eq!(dry.blob.backend, BlobBackend::Memory);
        assert_eq!(dry.ingestion.poll_interval_secs, 1);
        assert_eq!(dry.knowledge_index_id, "dry-run-index");
        assert_eq!(dry.consumer.id, "dry-run-consumer");
    }

    #[test]
    fn test_dry_run_settings_keep_identifiers() {
        let mut settings = Settings::default();
        settings.knowledge_index_id = "kb-prod".to_string();
        let dry = dry_run_settings(&settings);
        assert_eq!(dry.knowledge_index_id, "kb-prod");
    }

    #[test]
    fn test_dry_run_runner_builds_one_partition_per_source() {
        let mut settings = dry_run_settings(&Settings::default());
        settings.extract.base_url = "http://127.0.0.1:9".to_string();
        let (_runner, index) = dry_run_runner(&settings).unwrap();
        assert_eq!(index.started_jobs().len(), 0);
        assert_eq!(index.aliases().len(), 0);
    }
}
