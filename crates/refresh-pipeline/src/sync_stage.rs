//! Sync stage: re-index every partition, then rotate the serving alias.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use refresh_sync::{PartitionCatalog, RotationManager, RotationOutcome, SequentialScheduler};
use refresh_types::{EmptyCatalogPolicy, Stage, SyncRunResult};

use crate::blob::BlobStore;
use crate::error::StageError;
use crate::stage::{RunContext, StageOutput, StageTask};

/// Detail recorded for the sync stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStageDetail {
    pub staged_files: usize,
    pub sync: SyncRunResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationOutcome>,
    pub rotation_skipped: bool,
}

pub struct SyncStage {
    blob: Arc<BlobStore>,
    chunk_prefix: String,
    catalog: PartitionCatalog,
    scheduler: SequentialScheduler,
    rotation: RotationManager,
    consumer_id: String,
    empty_catalog: EmptyCatalogPolicy,
}

impl SyncStage {
    pub fn new(
        blob: Arc<BlobStore>,
        chunk_prefix: impl Into<String>,
        catalog: PartitionCatalog,
        scheduler: SequentialScheduler,
        rotation: RotationManager,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            blob,
            chunk_prefix: chunk_prefix.into(),
            catalog,
            scheduler,
            rotation,
            consumer_id: consumer_id.into(),
            empty_catalog: EmptyCatalogPolicy::default(),
        }
    }

    pub fn with_empty_catalog(mut self, policy: EmptyCatalogPolicy) -> Self {
        self.empty_catalog = policy;
        self
    }

    /// Chunk files (not sidecars) currently staged.
    async fn staged_files(&self) -> Result<usize, StageError> {
        let keys = self.blob.list(&self.chunk_prefix).await?;
        Ok(keys
            .iter()
            .filter(|k| !k.ends_with(".metadata.json"))
            .filter(|k| k.ends_with(".jsonl") || k.ends_with(".csv"))
            .count())
    }
}

#[async_trait]
impl StageTask for SyncStage {
    fn stage(&self) -> Stage {
        Stage::Sync
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let staged_files = self.staged_files().await?;
        if staged_files == 0 {
            warn!(prefix = %self.chunk_prefix, "No staged content, skipping sync");
            return Ok(StageOutput::no_data("no staged content to sync"));
        }

        let partitions = self.catalog.resolve().await.map_err(StageError::Catalog)?;
        let sync = self.scheduler.sync_all(&partitions, ctx.run_at).await;

        let mut detail = SyncStageDetail {
            staged_files,
            sync,
            rotation: None,
            rotation_skipped: false,
        };

        if detail.sync.is_noop() && self.empty_catalog == EmptyCatalogPolicy::Skip {
            info!("Empty partition catalog, leaving the live alias in place");
            detail.rotation_skipped = true;
            let message = format!("{}; rotation skipped", detail.sync.summary());
            return Ok(StageOutput::succeeded(message).with_detail(serde_json::to_value(&detail)?));
        }

        let outcome = match self
            .rotation
            .rotate_at(self.catalog.index_id(), &self.consumer_id, ctx.run_at)
            .await
        {
            Ok(outcome) => outcome,
            Err(source) => {
                return Err(StageError::Rotation {
                    sync: Box::new(detail.sync),
                    source,
                })
            }
        };

        let message = format!(
            "{}; consumer now on alias {}",
            detail.sync.summary(),
            outcome.alias.alias_name
        );
        detail.rotation = Some(outcome);
        Ok(StageOutput::succeeded(message).with_detail(serde_json::to_value(&detail)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refresh_sync::{
        ConsumerConfigStore, IngestionDriver, InMemoryConsumerConfigStore, InMemoryKnowledgeIndex,
        JobScript, PollSchedule,
    };
    use refresh_types::{Partition, StepOutcome};

    struct Fixture {
        blob: Arc<BlobStore>,
        index: Arc<InMemoryKnowledgeIndex>,
        consumers: Arc<InMemoryConsumerConfigStore>,
    }

    impl Fixture {
        fn new(index: InMemoryKnowledgeIndex) -> Self {
            Self {
                blob: Arc::new(BlobStore::in_memory()),
                index: Arc::new(index),
                consumers: Arc::new(
                    InMemoryConsumerConfigStore::new().with_value("chat", "alias_id", "alias-old"),
                ),
            }
        }

        fn stage(&self) -> SyncStage {
            SyncStage::new(
                self.blob.clone(),
                "knowledge/",
                PartitionCatalog::new(self.index.clone(), "kb-1"),
                SequentialScheduler::new(IngestionDriver::new(
                    self.index.clone(),
                    "kb-1",
                    PollSchedule::default(),
                )),
                RotationManager::new(
                    self.index.clone(),
                    self.consumers.clone(),
                    "alias_id",
                    "refresh",
                ),
                "chat",
            )
        }

        async fn stage_chunk(&self) {
            self.blob
                .put("knowledge/events/events_chunk_001.jsonl", "{}\n")
                .await
                .unwrap();
        }

        async fn pointer(&self) -> Option<String> {
            self.consumers
                .get_config("chat")
                .await
                .unwrap()
                .get("alias_id")
                .map(str::to_string)
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            run_id: "run-1".into(),
            run_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_no_staged_content_skips_everything() {
        let f = Fixture::new(
            InMemoryKnowledgeIndex::new()
                .with_partition(Partition::new("ds-1", "events"), JobScript::default()),
        );
        f.blob
            .put("knowledge/events/events_chunk_001.jsonl.metadata.json", "{}")
            .await
            .unwrap();

        let output = f.stage().execute(&ctx()).await.unwrap();

        assert_eq!(output.outcome, StepOutcome::NoData);
        assert!(f.index.started_jobs().is_empty());
        assert_eq!(f.index.prepare_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_then_rotate() {
        let f = Fixture::new(
            InMemoryKnowledgeIndex::new()
                .with_partition(Partition::new("ds-1", "events"), JobScript::completes_after(2))
                .with_partition(Partition::new("ds-2", "stores"), JobScript::fails_after(1)),
        );
        f.stage_chunk().await;

        let output = f.stage().execute(&ctx()).await.unwrap();

        let detail: SyncStageDetail = serde_json::from_value(output.detail.unwrap()).unwrap();
        assert_eq!((detail.sync.completed, detail.sync.failed), (1, 1));
        let alias = detail.rotation.unwrap().alias;
        assert_eq!(f.pointer().await, Some(alias.alias_id));
    }

    #[tokio::test]
    async fn test_empty_catalog_rotates_by_default() {
        let f = Fixture::new(InMemoryKnowledgeIndex::new());
        f.stage_chunk().await;

        let output = f.stage().execute(&ctx()).await.unwrap();

        let detail: SyncStageDetail = serde_json::from_value(output.detail.unwrap()).unwrap();
        assert!(detail.sync.is_noop());
        assert!(!detail.rotation_skipped);
        assert_eq!(f.index.prepare_calls(), 1);
        assert_eq!(f.pointer().await.as_deref(), Some("alias-1"));
    }

    #[tokio::test]
    async fn test_empty_catalog_skip_policy() {
        let f = Fixture::new(InMemoryKnowledgeIndex::new());
        f.stage_chunk().await;

        let output = f
            .stage()
            .with_empty_catalog(EmptyCatalogPolicy::Skip)
            .execute(&ctx())
            .await
            .unwrap();

        assert!(output.message.ends_with("rotation skipped"));
        assert_eq!(f.index.prepare_calls(), 0);
        assert_eq!(f.pointer().await.as_deref(), Some("alias-old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_failure_carries_sync_result() {
        let f = Fixture::new(
            InMemoryKnowledgeIndex::new()
                .with_partition(Partition::new("ds-1", "events"), JobScript::default()),
        );
        f.index.fail_prepare("index busy");
        f.stage_chunk().await;

        let err = f.stage().execute(&ctx()).await.unwrap_err();

        match &err {
            StageError::Rotation { sync, source } => {
                assert_eq!(sync.completed, 1);
                assert!(source.pointer_untouched());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_transient());
        assert_eq!(f.pointer().await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_catalog_failure_is_transient() {
        let f = Fixture::new(InMemoryKnowledgeIndex::new());
        f.index.fail_list("connection refused");
        f.stage_chunk().await;

        let err = f.stage().execute(&ctx()).await.unwrap_err();
        assert!(matches!(err, StageError::Catalog(_)));
        assert!(err.is_transient());
    }
}
