//! Configuration loading for the refresh orchestrator.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `<config dir>/kb-refresh/config.toml`.
//! Environment variables use the `REFRESH_` prefix and `__` between nested
//! keys, e.g. `REFRESH_INGESTION__POLL_INTERVAL_SECS=5`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::RefreshError;

/// A named value taken from a raw record by dotted JSON path
/// (e.g. `title.rendered`, `acf.cards.0.data.date`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub path: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// One content source: where it is extracted from and how it is chunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source name; also the raw file name and the partition prefix
    pub name: String,

    /// Endpoint path below `extract.base_url`. Sources without an endpoint
    /// are maintained out-of-band and are only transformed.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Fields joined into the document text, in order
    pub text_fields: Vec<FieldSpec>,

    /// Fields copied into document metadata when non-empty
    #[serde(default)]
    pub metadata_fields: Vec<FieldSpec>,

    /// Path of the field used to derive document ids
    pub id_field: String,

    /// Documents per chunk file
    pub rows_per_chunk: usize,

    pub document_type: String,
    pub search_category: String,
}

/// Knowledge-index service API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

/// Where staged content lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    /// Process-local store; contents vanish on exit
    Memory,
    /// Directory on local disk (default)
    #[default]
    Local,
    /// S3 bucket
    S3,
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSettings {
    #[serde(default)]
    pub backend: BlobBackend,

    #[serde(default = "default_local_root")]
    pub local_root: String,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Key prefix applied to every object
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,

    #[serde(default = "default_chunk_prefix")]
    pub chunk_prefix: String,

    #[serde(default = "default_report_key")]
    pub report_key: String,
}

fn default_local_root() -> String {
    ProjectDirs::from("", "", "kb-refresh")
        .map(|p| p.data_local_dir().join("blobs"))
        .unwrap_or_else(|| PathBuf::from("./blobs"))
        .to_string_lossy()
        .to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_raw_prefix() -> String {
    "raw/".to_string()
}

fn default_chunk_prefix() -> String {
    "knowledge/".to_string()
}

fn default_report_key() -> String {
    "reports/last_run.json".to_string()
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            local_root: default_local_root(),
            bucket: None,
            region: default_region(),
            prefix: String::new(),
            raw_prefix: default_raw_prefix(),
            chunk_prefix: default_chunk_prefix(),
            report_key: default_report_key(),
        }
    }
}

/// Settings for the consuming chat service's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Consumer identifier
    #[serde(default)]
    pub id: String,

    /// Key inside the consumer's configuration that names the live alias
    #[serde(default = "default_alias_key")]
    pub alias_key: String,

    /// Directory holding consumer configuration documents
    #[serde(default = "default_consumer_dir")]
    pub config_dir: String,
}

fn default_alias_key() -> String {
    "alias_id".to_string()
}

fn default_consumer_dir() -> String {
    ProjectDirs::from("", "", "kb-refresh")
        .map(|p| p.data_local_dir().join("consumers"))
        .unwrap_or_else(|| PathBuf::from("./consumers"))
        .to_string_lossy()
        .to_string()
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            alias_key: default_alias_key(),
            config_dir: default_consumer_dir(),
        }
    }
}

/// Daily trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// 6-field cron expression (sec min hour day month weekday)
    #[serde(default = "default_cron")]
    pub cron: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub jitter_secs: u64,
}

fn default_cron() -> String {
    // 03:00 UTC every day
    "0 0 3 * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
            jitter_secs: 0,
        }
    }
}

/// Ingestion job polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_job_timeout() -> u64 {
    600
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

/// What to do when the knowledge index has no registered partitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCatalogPolicy {
    /// Prepare and publish a new alias anyway
    #[default]
    Rotate,
    /// Leave the live alias untouched
    Skip,
}

/// Whole-run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Attempts per stage for transient failures, including the first
    #[serde(default = "default_stage_attempts")]
    pub stage_max_attempts: u32,

    #[serde(default)]
    pub empty_catalog: EmptyCatalogPolicy,

    /// Prefix for generated alias names
    #[serde(default = "default_alias_prefix")]
    pub alias_prefix: String,
}

fn default_run_timeout() -> u64 {
    3600
}

fn default_stage_attempts() -> u32 {
    3
}

fn default_alias_prefix() -> String {
    "refresh".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            stage_max_attempts: default_stage_attempts(),
            empty_catalog: EmptyCatalogPolicy::default(),
            alias_prefix: default_alias_prefix(),
        }
    }
}

/// Content extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSettings {
    /// Base URL of the paginated content API
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_per_page")]
    pub per_page: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,
}

fn default_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    100
}

fn default_extract_timeout() -> u64 {
    30
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            timeout_secs: default_extract_timeout(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Knowledge index whose partitions are refreshed
    #[serde(default)]
    pub knowledge_index_id: String,

    #[serde(default)]
    pub consumer: ConsumerSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub blob: BlobSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub ingestion: IngestionSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub extract: ExtractSettings,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceSettings>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn fields(pairs: &[(&str, &str)]) -> Vec<FieldSpec> {
    pairs
        .iter()
        .map(|(name, path)| FieldSpec::new(*name, *path))
        .collect()
}

/// The four content sources the assistant is built on.
pub fn default_sources() -> Vec<SourceSettings> {
    let card = "acf.informacion_tienda.0.cards.0.data";
    let info = "acf.informacion_tienda.0.info";

    let venue_text = |kind: &str| {
        fields(&[
            (kind, "title.rendered"),
            ("Level", &format!("{info}.level")),
            ("Unit", &format!("{info}.local")),
            ("Location", &format!("{info}.place")),
            ("Hours", &format!("{info}.schedule")),
            ("Description", "content.rendered"),
            ("Phone", &format!("{info}.phone")),
            ("Web", &format!("{info}.page_link.title")),
            ("More information", "link"),
        ])
    };
    let venue_metadata = || {
        fields(&[
            ("title", "title.rendered"),
            ("location", &format!("{info}.place")),
            ("hours", &format!("{info}.schedule")),
            ("level", &format!("{info}.level")),
            ("unit", &format!("{info}.local")),
            ("phone", &format!("{info}.phone")),
            ("mail", &format!("{info}.mail")),
            ("web", &format!("{info}.page_link.url")),
            ("link", "link"),
        ])
    };

    vec![
        SourceSettings {
            name: "events".to_string(),
            endpoint: Some("event".to_string()),
            text_fields: fields(&[
                ("Event", "title.rendered"),
                ("Date", &format!("{card}.date")),
                ("Time", &format!("{card}.hour")),
                ("Location", &format!("{card}.place")),
                ("Description", &format!("{card}.description")),
                ("Details", "content.rendered"),
                ("Organizer", "acf.informacion_destacada.organizer"),
                ("More information", "link"),
            ]),
            metadata_fields: fields(&[
                ("title", "title.rendered"),
                ("date", &format!("{card}.date")),
                ("time", &format!("{card}.hour")),
                ("location", &format!("{card}.place")),
                ("organizer", "acf.informacion_destacada.organizer"),
                ("link", "link"),
            ]),
            id_field: "title.rendered".to_string(),
            rows_per_chunk: 8,
            document_type: "event".to_string(),
            search_category: "events_and_activities".to_string(),
        },
        SourceSettings {
            name: "stores".to_string(),
            endpoint: Some("stores".to_string()),
            text_fields: venue_text("Store"),
            metadata_fields: venue_metadata(),
            id_field: "title.rendered".to_string(),
            rows_per_chunk: 20,
            document_type: "store".to_string(),
            search_category: "shops_and_stores".to_string(),
        },
        SourceSettings {
            name: "restaurants".to_string(),
            endpoint: Some("restaurant".to_string()),
            text_fields: venue_text("Restaurant"),
            metadata_fields: venue_metadata(),
            id_field: "title.rendered".to_string(),
            rows_per_chunk: 15,
            document_type: "restaurant".to_string(),
            search_category: "dining".to_string(),
        },
        SourceSettings {
            name: "faqs".to_string(),
            endpoint: None,
            text_fields: fields(&[("Question", "question"), ("Answer", "answer")]),
            metadata_fields: fields(&[
                ("question", "question"),
                ("answer", "answer"),
                ("category", "category"),
            ]),
            id_field: "question".to_string(),
            rows_per_chunk: 10,
            document_type: "faq".to_string(),
            search_category: "frequently_asked_questions".to_string(),
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            knowledge_index_id: String::new(),
            consumer: ConsumerSettings::default(),
            api: ApiSettings::default(),
            blob: BlobSettings::default(),
            schedule: ScheduleSettings::default(),
            ingestion: IngestionSettings::default(),
            pipeline: PipelineSettings::default(),
            extract: ExtractSettings::default(),
            sources: default_sources(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (<config dir>/kb-refresh/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (REFRESH_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, RefreshError> {
        let config_dir = ProjectDirs::from("", "", "kb-refresh")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("log_level", default_log_level())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            .set_default("schedule.cron", default_cron())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            .set_default("schedule.timezone", default_timezone())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            .set_default("ingestion.poll_interval_secs", default_poll_interval())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            .set_default("ingestion.job_timeout_secs", default_job_timeout())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            .set_default("pipeline.run_timeout_secs", default_run_timeout())
            .map_err(|e| RefreshError::Config(e.to_string()))?
            // 2. Default config file
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. CLI-specified config file (higher precedence than default)
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables
        // Format: REFRESH_KNOWLEDGE_INDEX_ID, REFRESH_API__BASE_URL, ...
        builder = builder.add_source(
            Environment::with_prefix("REFRESH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| RefreshError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| RefreshError::Config(e.to_string()))
    }

    /// Check the settings required to run a refresh.
    pub fn validate(&self) -> Result<(), RefreshError> {
        if self.knowledge_index_id.trim().is_empty() {
            return Err(RefreshError::Config(
                "knowledge_index_id must be set".to_string(),
            ));
        }
        if self.consumer.id.trim().is_empty() {
            return Err(RefreshError::Config("consumer.id must be set".to_string()));
        }
        if self.consumer.alias_key.trim().is_empty() {
            return Err(RefreshError::Config(
                "consumer.alias_key must not be empty".to_string(),
            ));
        }
        if self.ingestion.poll_interval_secs == 0 || self.ingestion.job_timeout_secs == 0 {
            return Err(RefreshError::Config(
                "ingestion intervals must be > 0".to_string(),
            ));
        }
        if self.ingestion.poll_interval_secs > self.ingestion.job_timeout_secs {
            return Err(RefreshError::Config(format!(
                "poll_interval_secs ({}) exceeds job_timeout_secs ({})",
                self.ingestion.poll_interval_secs, self.ingestion.job_timeout_secs
            )));
        }
        if self.pipeline.run_timeout_secs == 0 {
            return Err(RefreshError::Config(
                "pipeline.run_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.pipeline.stage_max_attempts == 0 {
            return Err(RefreshError::Config(
                "pipeline.stage_max_attempts must be >= 1".to_string(),
            ));
        }
        if self.blob.backend == BlobBackend::S3 && self.blob.bucket.is_none() {
            return Err(RefreshError::Config(
                "blob.bucket is required for the s3 backend".to_string(),
            ));
        }
        for source in &self.sources {
            if source.rows_per_chunk == 0 {
                return Err(RefreshError::InvalidInput(format!(
                    "source '{}': rows_per_chunk must be > 0",
                    source.name
                )));
            }
            if source.text_fields.is_empty() {
                return Err(RefreshError::InvalidInput(format!(
                    "source '{}': at least one text field is required",
                    source.name
                )));
            }
        }
        if self.sources.iter().any(|s| s.endpoint.is_some()) && self.extract.base_url.is_empty() {
            return Err(RefreshError::Config(
                "extract.base_url is required when a source has an endpoint".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of the settings safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api.api_key.is_some() {
            copy.api.api_key = Some("***".to_string());
        }
        copy
    }

    /// Local blob root with `~` expanded.
    pub fn expanded_local_root(&self) -> PathBuf {
        expand_home(&self.blob.local_root)
    }

    /// Consumer configuration directory with `~` expanded.
    pub fn expanded_consumer_dir(&self) -> PathBuf {
        expand_home(&self.consumer.config_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
