//! HTTP adapter for the knowledge-index service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use refresh_types::{ApiSettings, JobState, Partition, PrepareStatus};

use crate::client::{JobHandle, JobStatus, KnowledgeIndexClient, KnowledgeIndexError};

/// Configuration for [`HttpKnowledgeIndexClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Service base URL (e.g., "https://kb.internal/v1")
    pub base_url: String,

    /// Bearer token, if the service requires one
    pub api_key: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }
}

impl From<&ApiSettings> for HttpClientConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: settings
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.clone())),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[derive(Deserialize)]
struct PartitionList {
    partitions: Vec<Partition>,
}

#[derive(Serialize)]
struct StartJobRequest<'a> {
    description: &'a str,
}

#[derive(Deserialize)]
struct StartJobResponse {
    job_id: String,
    status: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    failure_reasons: Vec<String>,
}

#[derive(Deserialize)]
struct PrepareResponse {
    status: PrepareStatus,
}

#[derive(Serialize)]
struct CreateAliasRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateAliasResponse {
    alias_id: String,
}

/// Map a wire status to a job state.
fn parse_job_state(raw: &str) -> Option<JobState> {
    match raw {
        "STARTING" => Some(JobState::Starting),
        "IN_PROGRESS" => Some(JobState::InProgress),
        "COMPLETE" => Some(JobState::Complete),
        "FAILED" => Some(JobState::Failed),
        "STOPPED" => Some(JobState::Stopped),
        _ => None,
    }
}

fn job_status_from_wire(raw: &str, failure_reasons: &[String]) -> JobStatus {
    match parse_job_state(raw) {
        Some(state) if failure_reasons.is_empty() => JobStatus::new(state),
        Some(state) => JobStatus::with_detail(state, failure_reasons.join("; ")),
        None => JobStatus::with_detail(JobState::Error, format!("unrecognized job status: {raw}")),
    }
}

/// reqwest-backed knowledge-index client.
pub struct HttpKnowledgeIndexClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpKnowledgeIndexClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, KnowledgeIndexError> {
        if config.base_url.is_empty() {
            return Err(KnowledgeIndexError::Config("base_url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KnowledgeIndexError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, KnowledgeIndexError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| KnowledgeIndexError::Http(e.to_string()))?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| KnowledgeIndexError::Parse(e.to_string()))
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response, KnowledgeIndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(KnowledgeIndexError::RateLimited);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        404 => Err(KnowledgeIndexError::NotFound(what.to_string())),
        409 => Err(KnowledgeIndexError::Rejected(body)),
        code => Err(KnowledgeIndexError::Status { status: code, body }),
    }
}

#[async_trait]
impl KnowledgeIndexClient for HttpKnowledgeIndexClient {
    async fn list_partitions(
        &self,
        index_id: &str,
    ) -> Result<Vec<Partition>, KnowledgeIndexError> {
        let url = self.url(&format!("/indexes/{index_id}/partitions"));
        debug!(url = %url, "Listing partitions");
        let list: PartitionList = self
            .send(self.client.get(&url), &format!("index {index_id}"))
            .await?;
        Ok(list.partitions)
    }

    async fn start_job(
        &self,
        index_id: &str,
        partition_id: &str,
        description: &str,
    ) -> Result<JobHandle, KnowledgeIndexError> {
        let url = self.url(&format!(
            "/indexes/{index_id}/partitions/{partition_id}/jobs"
        ));
        let response: StartJobResponse = self
            .send(
                self.client.post(&url).json(&StartJobRequest { description }),
                &format!("partition {partition_id}"),
            )
            .await?;
        let status = job_status_from_wire(&response.status, &[]);
        Ok(JobHandle {
            job_id: response.job_id,
            status: status.state,
        })
    }

    async fn get_job_status(
        &self,
        index_id: &str,
        partition_id: &str,
        job_id: &str,
    ) -> Result<JobStatus, KnowledgeIndexError> {
        let url = self.url(&format!(
            "/indexes/{index_id}/partitions/{partition_id}/jobs/{job_id}"
        ));
        let response: JobStatusResponse = self
            .send(self.client.get(&url), &format!("job {job_id}"))
            .await?;
        Ok(job_status_from_wire(
            &response.status,
            &response.failure_reasons,
        ))
    }

    async fn prepare(&self, index_id: &str) -> Result<PrepareStatus, KnowledgeIndexError> {
        let url = self.url(&format!("/indexes/{index_id}/prepare"));
        let response: PrepareResponse = self
            .send(self.client.post(&url), &format!("index {index_id}"))
            .await?;
        Ok(response.status)
    }

    async fn create_alias(
        &self,
        index_id: &str,
        name: &str,
    ) -> Result<String, KnowledgeIndexError> {
        let url = self.url(&format!("/indexes/{index_id}/aliases"));
        let response: CreateAliasResponse = self
            .send(
                self.client.post(&url).json(&CreateAliasRequest { name }),
                &format!("index {index_id}"),
            )
            .await?;
        Ok(response.alias_id)
    }
}
