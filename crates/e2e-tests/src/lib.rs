//! End-to-end test infrastructure for the knowledge refresh pipeline.
//!
//! Provides a [`TestHarness`] that wires the real transform, sync, and
//! rotation code against in-memory collaborators, plus fixture content for
//! the four default sources. Extraction is replaced by [`FixtureExtract`],
//! which stages fixed raw records so runs are deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use refresh_pipeline::extract::to_json_lines;
use refresh_pipeline::{
    BlobStore, ChunkingTransformer, PipelineRunner, RunContext, RunnerConfig, StageError,
    StageOutput, StageTask, SyncStage, SyncStageDetail,
};
use refresh_sync::{
    ConsumerConfigStore, InMemoryConsumerConfigStore, InMemoryKnowledgeIndex, IngestionDriver,
    JobScript, PartitionCatalog, PollSchedule, RotationManager, SequentialScheduler,
};
use refresh_types::{
    default_sources, EmptyCatalogPolicy, Partition, RunReport, Settings, Stage, SyncRunResult,
};

pub const INDEX_ID: &str = "kb-mall";
pub const CONSUMER_ID: &str = "chat-assistant";
pub const ALIAS_KEY: &str = "alias_id";
/// Alias the consumer serves before any test run
pub const LIVE_ALIAS: &str = "alias-live";

/// Raw records per default source.
pub fn fixture_records() -> Vec<(String, Vec<Value>)> {
    vec![
        (
            "events".to_string(),
            vec![
                json!({
                    "title": {"rendered": "Jazz Night"},
                    "content": {"rendered": "<p>Live jazz quartet in the central atrium.</p>"},
                    "link": "https://mall.example/event/jazz-night",
                }),
                json!({
                    "title": {"rendered": "Kids Workshop"},
                    "content": {"rendered": "Painting &amp; crafts for ages 4 to 10."},
                    "link": "https://mall.example/event/kids-workshop",
                }),
            ],
        ),
        (
            "stores".to_string(),
            vec![json!({
                "title": {"rendered": "Blue Fox Books"},
                "content": {"rendered": "Independent bookshop with a large travel section."},
                "link": "https://mall.example/store/blue-fox-books",
            })],
        ),
        (
            "restaurants".to_string(),
            vec![json!({
                "title": {"rendered": "Casa Verde"},
                "content": {"rendered": "Mediterranean kitchen with a terrace view."},
                "link": "https://mall.example/restaurant/casa-verde",
            })],
        ),
        (
            "faqs".to_string(),
            vec![json!({
                "question": "Where can I park overnight?",
                "answer": "Level -2 of the east car park is open all night.",
                "category": "parking",
            })],
        ),
    ]
}

/// One partition per default source, in catalog order.
pub fn default_partitions() -> Vec<Partition> {
    default_sources()
        .iter()
        .enumerate()
        .map(|(i, s)| Partition::new(format!("ds-{}", i + 1), s.name.clone()))
        .collect()
}

/// Extract stage double that stages fixed raw records.
pub struct FixtureExtract {
    blob: Arc<BlobStore>,
    raw_prefix: String,
    records: Vec<(String, Vec<Value>)>,
}

impl FixtureExtract {
    pub fn new(
        blob: Arc<BlobStore>,
        raw_prefix: impl Into<String>,
        records: Vec<(String, Vec<Value>)>,
    ) -> Self {
        Self {
            blob,
            raw_prefix: raw_prefix.into(),
            records,
        }
    }
}

#[async_trait]
impl StageTask for FixtureExtract {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
        let mut total = 0;
        for (source, records) in &self.records {
            let key = format!("{}{}.jsonl", self.raw_prefix, source);
            self.blob.put(&key, to_json_lines(records)?).await?;
            total += records.len();
        }
        Ok(StageOutput::succeeded(format!("{total} records staged")))
    }
}

/// Shared harness for end-to-end scenarios.
pub struct TestHarness {
    pub settings: Settings,
    pub blob: Arc<BlobStore>,
    pub index: Arc<InMemoryKnowledgeIndex>,
    pub consumers: Arc<InMemoryConsumerConfigStore>,
    pub records: Vec<(String, Vec<Value>)>,
}

impl TestHarness {
    /// Harness over `index`, with the consumer serving [`LIVE_ALIAS`].
    pub fn new(index: InMemoryKnowledgeIndex) -> Self {
        let mut settings = Settings::default();
        settings.knowledge_index_id = INDEX_ID.to_string();
        settings.consumer.id = CONSUMER_ID.to_string();

        Self {
            settings,
            blob: Arc::new(BlobStore::in_memory()),
            index: Arc::new(index),
            consumers: Arc::new(
                InMemoryConsumerConfigStore::new().with_value(CONSUMER_ID, ALIAS_KEY, LIVE_ALIAS),
            ),
            records: fixture_records(),
        }
    }

    /// Harness whose catalog holds the four default partitions, each
    /// following the script at the same position.
    pub fn with_scripts(scripts: [JobScript; 4]) -> Self {
        let index = default_partitions()
            .into_iter()
            .zip(scripts)
            .fold(InMemoryKnowledgeIndex::new(), |index, (partition, script)| {
                index.with_partition(partition, script)
            });
        Self::new(index)
    }

    pub fn with_empty_catalog(mut self, policy: EmptyCatalogPolicy) -> Self {
        self.settings.pipeline.empty_catalog = policy;
        self
    }

    pub fn transformer(&self) -> ChunkingTransformer {
        ChunkingTransformer::new(
            self.settings.sources.clone(),
            self.blob.clone(),
            self.settings.blob.raw_prefix.clone(),
            self.settings.blob.chunk_prefix.clone(),
        )
    }

    /// Runner over the real transform and sync stages.
    pub fn runner(&self) -> PipelineRunner {
        let settings = &self.settings;
        let driver = IngestionDriver::new(
            self.index.clone(),
            INDEX_ID,
            PollSchedule::from(&settings.ingestion),
        );
        let consumers: Arc<dyn ConsumerConfigStore> = self.consumers.clone();
        let sync = SyncStage::new(
            self.blob.clone(),
            settings.blob.chunk_prefix.clone(),
            PartitionCatalog::new(self.index.clone(), INDEX_ID),
            SequentialScheduler::new(driver),
            RotationManager::new(
                self.index.clone(),
                consumers,
                ALIAS_KEY,
                settings.pipeline.alias_prefix.clone(),
            ),
            CONSUMER_ID,
        )
        .with_empty_catalog(settings.pipeline.empty_catalog);

        PipelineRunner::new(
            Arc::new(FixtureExtract::new(
                self.blob.clone(),
                settings.blob.raw_prefix.clone(),
                self.records.clone(),
            )),
            Arc::new(self.transformer()),
            Arc::new(sync),
            RunnerConfig::from(&settings.pipeline),
        )
        .with_report_sink(self.blob.clone(), settings.blob.report_key.clone())
    }

    /// The alias the consumer currently serves.
    pub async fn live_alias(&self) -> Option<String> {
        self.consumers
            .get_config(CONSUMER_ID)
            .await
            .ok()
            .and_then(|c| c.get(ALIAS_KEY).map(str::to_string))
    }
}

/// Sync stage detail from a report whose Sync stage succeeded.
pub fn sync_detail(report: &RunReport) -> Option<SyncStageDetail> {
    let detail = report.step(Stage::Sync)?.detail.clone()?;
    serde_json::from_value(detail).ok()
}

/// Sync result from a report, whether or not rotation succeeded.
pub fn sync_result(report: &RunReport) -> Option<SyncRunResult> {
    let detail = report.step(Stage::Sync)?.detail.as_ref()?;
    serde_json::from_value(detail.get("sync")?.clone()).ok()
}
