//! Extract stage: pull paginated content into raw blob files.
//!
//! Each source with an endpoint is fetched page by page and written as one
//! JSON object per line to `{raw_prefix}{source}.jsonl`, replacing the
//! previous run's file. Sources without an endpoint are maintained
//! out-of-band and are skipped here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use refresh_types::{ExtractSettings, SourceSettings, Stage};

use crate::blob::BlobStore;
use crate::error::StageError;
use crate::stage::{RunContext, StageOutput, StageTask};

/// Per-source extraction result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExtract {
    pub source: String,
    pub records: usize,
    pub pages: u32,
    /// Error that ended pagination early, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Paginated HTTP extractor.
pub struct HttpExtractor {
    client: Client,
    settings: ExtractSettings,
    sources: Vec<SourceSettings>,
    blob: Arc<BlobStore>,
    raw_prefix: String,
}

impl HttpExtractor {
    pub fn new(
        settings: ExtractSettings,
        sources: Vec<SourceSettings>,
        blob: Arc<BlobStore>,
        raw_prefix: impl Into<String>,
    ) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| StageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            settings,
            sources,
            blob,
            raw_prefix: raw_prefix.into(),
        })
    }

    async fn fetch_page(
        &self,
        endpoint: &str,
        page: u32,
    ) -> Result<Vec<serde_json::Value>, String> {
        let url = format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("per_page", self.settings.per_page), ("page", page)])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.json().await.map_err(|e| e.to_string())
    }

    /// Fetch every page of one source. A failing page ends pagination and
    /// keeps what was already fetched.
    async fn fetch_source(
        &self,
        source: &SourceSettings,
        endpoint: &str,
    ) -> (Vec<serde_json::Value>, SourceExtract) {
        let mut records = Vec::new();
        let mut summary = SourceExtract {
            source: source.name.clone(),
            ..Default::default()
        };

        for page in 1..=self.settings.max_pages {
            match self.fetch_page(endpoint, page).await {
                Ok(items) if items.is_empty() => break,
                Ok(items) => {
                    debug!(source = %source.name, page, items = items.len(), "Fetched page");
                    summary.pages = page;
                    records.extend(items);
                }
                Err(e) => {
                    warn!(
                        source = %source.name,
                        page,
                        error = %e,
                        "Page fetch failed, ending pagination"
                    );
                    summary.error = Some(format!("page {page}: {e}"));
                    break;
                }
            }
        }
        summary.records = records.len();
        (records, summary)
    }

    fn raw_key(&self, source: &str) -> String {
        format!("{}{}.jsonl", self.raw_prefix, source)
    }
}

/// Serialize records as JSON lines.
pub fn to_json_lines(records: &[serde_json::Value]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

#[async_trait]
impl StageTask for HttpExtractor {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let mut summaries = Vec::new();

        for source in &self.sources {
            let Some(endpoint) = source.endpoint.as_deref() else {
                debug!(source = %source.name, "No endpoint, skipping extraction");
                continue;
            };

            let (records, summary) = self.fetch_source(source, endpoint).await;
            if records.is_empty() {
                warn!(source = %source.name, "No records extracted");
            } else {
                let key = self.raw_key(&source.name);
                self.blob.put(&key, to_json_lines(&records)?).await?;
                info!(
                    run_id = %ctx.run_id,
                    source = %source.name,
                    records = records.len(),
                    key = %key,
                    "Raw content written"
                );
            }
            summaries.push(summary);
        }

        // Nothing at all came back and every source errored: the content
        // service is down, not empty.
        if !summaries.is_empty()
            && summaries.iter().all(|s| s.records == 0 && s.error.is_some())
        {
            let first = summaries
                .iter()
                .find_map(|s| s.error.clone())
                .unwrap_or_default();
            return Err(StageError::SourceUnavailable(first));
        }

        let total: usize = summaries.iter().map(|s| s.records).sum();
        let message = format!("{} records from {} sources", total, summaries.len());
        Ok(StageOutput::succeeded(message).with_detail(serde_json::to_value(&summaries)?))
    }
}
