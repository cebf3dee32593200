//! Scriptable in-memory knowledge-index service.
//!
//! Each partition carries a [`JobScript`] describing how its jobs behave
//! when polled. The service enforces one active job per index, the same
//! constraint the managed service imposes, and records the highest number
//! of simultaneously active jobs it has seen.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use refresh_types::{JobState, Partition, PrepareStatus};

use crate::client::{JobHandle, JobStatus, KnowledgeIndexClient, KnowledgeIndexError};

/// One scripted answer to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Status(JobState),
    /// The status call itself fails
    Error(String),
}

/// How jobs for one partition behave.
///
/// Polls consume `steps` in order; the last step repeats forever. An empty
/// script completes on the first poll.
#[derive(Debug, Clone, Default)]
pub struct JobScript {
    pub start_error: Option<String>,
    pub steps: Vec<PollStep>,
}

impl JobScript {
    /// Reports `InProgress` for `polls - 1` polls, then `Complete`.
    pub fn completes_after(polls: usize) -> Self {
        let mut steps = vec![PollStep::Status(JobState::InProgress); polls.saturating_sub(1)];
        steps.push(PollStep::Status(JobState::Complete));
        Self {
            start_error: None,
            steps,
        }
    }

    pub fn fails_after(polls: usize) -> Self {
        let mut steps = vec![PollStep::Status(JobState::InProgress); polls.saturating_sub(1)];
        steps.push(PollStep::Status(JobState::Failed));
        Self {
            start_error: None,
            steps,
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            start_error: None,
            steps: vec![PollStep::Status(JobState::InProgress)],
        }
    }

    pub fn start_fails(message: impl Into<String>) -> Self {
        Self {
            start_error: Some(message.into()),
            steps: Vec::new(),
        }
    }

    /// Prefix the script with `count` failing status calls.
    pub fn with_poll_errors(mut self, count: usize) -> Self {
        let mut steps = vec![PollStep::Error("connection reset".to_string()); count];
        steps.append(&mut self.steps);
        if steps.iter().all(|s| matches!(s, PollStep::Error(_))) {
            steps.push(PollStep::Status(JobState::Complete));
        }
        self.steps = steps;
        self
    }
}

struct ActiveJob {
    partition_id: String,
    remaining: VecDeque<PollStep>,
    last: PollStep,
}

#[derive(Default)]
struct State {
    partitions: Vec<Partition>,
    scripts: HashMap<String, JobScript>,
    jobs: HashMap<String, ActiveJob>,
    active: usize,
    started: Vec<(String, String)>,
    aliases: Vec<(String, String)>,
    prepare_calls: usize,
    prepare_result: Option<Result<PrepareStatus, String>>,
    alias_error: Option<String>,
    list_error: Option<String>,
}

/// In-memory [`KnowledgeIndexClient`].
#[derive(Default)]
pub struct InMemoryKnowledgeIndex {
    state: Mutex<State>,
    next_id: AtomicUsize,
    max_active: AtomicUsize,
}

impl InMemoryKnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a partition with the given job behavior.
    pub fn with_partition(self, partition: Partition, script: JobScript) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.scripts.insert(partition.id.clone(), script);
            state.partitions.push(partition);
        }
        self
    }

    pub fn fail_prepare(&self, message: impl Into<String>) {
        self.with_state(|s| s.prepare_result = Some(Err(message.into())));
    }

    pub fn set_prepare_status(&self, status: PrepareStatus) {
        self.with_state(|s| s.prepare_result = Some(Ok(status)));
    }

    pub fn fail_create_alias(&self, message: impl Into<String>) {
        self.with_state(|s| s.alias_error = Some(message.into()));
    }

    pub fn fail_list(&self, message: impl Into<String>) {
        self.with_state(|s| s.list_error = Some(message.into()));
    }

    /// Highest number of jobs that were active at the same time.
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// `(partition_id, description)` for every accepted job, in start order.
    pub fn started_jobs(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.started.clone())
    }

    pub fn prepare_calls(&self) -> usize {
        self.with_state(|s| s.prepare_calls)
    }

    /// `(alias_id, alias_name)` for every created alias.
    pub fn aliases(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.aliases.clone())
    }

    fn with_state<R: Default>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(_) => R::default(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, KnowledgeIndexError> {
        self.state
            .lock()
            .map_err(|e| KnowledgeIndexError::Http(e.to_string()))
    }
}

#[async_trait]
impl KnowledgeIndexClient for InMemoryKnowledgeIndex {
    async fn list_partitions(
        &self,
        _index_id: &str,
    ) -> Result<Vec<Partition>, KnowledgeIndexError> {
        let state = self.lock()?;
        if let Some(message) = &state.list_error {
            return Err(KnowledgeIndexError::Http(message.clone()));
        }
        Ok(state.partitions.clone())
    }

    async fn start_job(
        &self,
        _index_id: &str,
        partition_id: &str,
        description: &str,
    ) -> Result<JobHandle, KnowledgeIndexError> {
        let mut state = self.lock()?;
        let script = state
            .scripts
            .get(partition_id)
            .cloned()
            .ok_or_else(|| KnowledgeIndexError::NotFound(format!("partition {partition_id}")))?;
        if let Some(message) = script.start_error {
            return Err(KnowledgeIndexError::Http(message));
        }
        if state.active > 0 {
            return Err(KnowledgeIndexError::Rejected(
                "an ingestion job is already in progress for this index".to_string(),
            ));
        }

        let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut remaining: VecDeque<PollStep> = script.steps.into();
        if remaining.is_empty() {
            remaining.push_back(PollStep::Status(JobState::Complete));
        }
        let last = remaining
            .back()
            .cloned()
            .unwrap_or(PollStep::Status(JobState::Complete));

        state.jobs.insert(
            job_id.clone(),
            ActiveJob {
                partition_id: partition_id.to_string(),
                remaining,
                last,
            },
        );
        state.active += 1;
        self.max_active.fetch_max(state.active, Ordering::SeqCst);
        state
            .started
            .push((partition_id.to_string(), description.to_string()));

        Ok(JobHandle {
            job_id,
            status: JobState::Starting,
        })
    }

    async fn get_job_status(
        &self,
        _index_id: &str,
        partition_id: &str,
        job_id: &str,
    ) -> Result<JobStatus, KnowledgeIndexError> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(job_id)
            .filter(|j| j.partition_id == partition_id)
            .ok_or_else(|| KnowledgeIndexError::NotFound(format!("job {job_id}")))?;

        let step = job.remaining.pop_front().unwrap_or_else(|| job.last.clone());
        match step {
            PollStep::Error(message) => Err(KnowledgeIndexError::Http(message)),
            PollStep::Status(status) => {
                if status.is_terminal() {
                    state.jobs.remove(job_id);
                    state.active = state.active.saturating_sub(1);
                }
                Ok(JobStatus::new(status))
            }
        }
    }

    async fn prepare(&self, _index_id: &str) -> Result<PrepareStatus, KnowledgeIndexError> {
        let mut state = self.lock()?;
        state.prepare_calls += 1;
        match &state.prepare_result {
            None => Ok(PrepareStatus::Prepared),
            Some(Ok(status)) => Ok(*status),
            Some(Err(message)) => Err(KnowledgeIndexError::Status {
                status: 500,
                body: message.clone(),
            }),
        }
    }

    async fn create_alias(
        &self,
        _index_id: &str,
        name: &str,
    ) -> Result<String, KnowledgeIndexError> {
        let mut state = self.lock()?;
        if let Some(message) = &state.alias_error {
            return Err(KnowledgeIndexError::Rejected(message.clone()));
        }
        let alias_id = format!("alias-{}", state.aliases.len() + 1);
        state.aliases.push((alias_id.clone(), name.to_string()));
        Ok(alias_id)
    }
}
