//! Ingestion job driver.
//!
//! Starts one job for one partition and polls it to a terminal state under
//! a wall-clock budget. Job start is never retried; status polls are.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use refresh_types::{IngestionJob, JobState, Partition};

use crate::client::KnowledgeIndexClient;
use crate::poll::PollSchedule;

pub struct IngestionDriver {
    client: Arc<dyn KnowledgeIndexClient>,
    index_id: String,
    schedule: PollSchedule,
}

impl IngestionDriver {
    pub fn new(
        client: Arc<dyn KnowledgeIndexClient>,
        index_id: impl Into<String>,
        schedule: PollSchedule,
    ) -> Self {
        Self {
            client,
            index_id: index_id.into(),
            schedule,
        }
    }

    pub fn schedule(&self) -> PollSchedule {
        self.schedule
    }

    /// Run one ingestion job for `partition` and return its terminal record.
    ///
    /// Returns no later than `timeout + interval` after the call. Time spent
    /// starting the job counts against the timeout. A job that is still
    /// running when the budget runs out is reported as `TimedOut` and left
    /// running on the service side.
    pub async fn run_ingestion(&self, partition: &Partition, description: &str) -> IngestionJob {
        let started = Instant::now();

        let start = tokio::time::timeout(
            self.schedule.timeout,
            self.client.start_job(&self.index_id, &partition.id, description),
        )
        .await;
        let handle = match start {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(partition = %partition.name, error = %e, "Failed to start ingestion job");
                return IngestionJob::start_failed(partition, e.to_string());
            }
            Err(_) => {
                warn!(
                    partition = %partition.name,
                    timeout_secs = self.schedule.timeout.as_secs(),
                    "Ingestion job start did not return in time"
                );
                return IngestionJob::start_failed(
                    partition,
                    format!(
                        "job start did not return within {}s",
                        self.schedule.timeout.as_secs()
                    ),
                );
            }
        };

        info!(
            partition = %partition.name,
            job_id = %handle.job_id,
            status = %handle.status,
            "Ingestion job started"
        );
        let mut job = IngestionJob::started(partition, handle.job_id.clone(), handle.status);
        if job.is_terminal() {
            return job;
        }

        let mut window = self.schedule.start_at(started);
        while window.wait_next().await {
            // A status call may not outlast one interval, so the loop stays
            // within timeout + interval overall.
            let poll = tokio::time::timeout(
                self.schedule.interval,
                self.client.get_job_status(&self.index_id, &partition.id, &handle.job_id),
            )
            .await;

            let status = match poll {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    warn!(
                        partition = %partition.name,
                        job_id = %handle.job_id,
                        attempt = window.attempts(),
                        error = %e,
                        "Status poll failed, will retry"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(
                        partition = %partition.name,
                        job_id = %handle.job_id,
                        attempt = window.attempts(),
                        "Status poll timed out, will retry"
                    );
                    continue;
                }
            };

            debug!(
                partition = %partition.name,
                job_id = %handle.job_id,
                status = %status.state,
                "Polled ingestion job"
            );

            if status.state.is_terminal() {
                match status.detail {
                    Some(detail) => job.terminate_with(status.state, detail),
                    None => job.transition(status.state),
                };
                info!(
                    partition = %partition.name,
                    job_id = %handle.job_id,
                    status = %job.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Ingestion job finished"
                );
                return job;
            }
            job.transition(status.state);
        }

        warn!(
            partition = %partition.name,
            job_id = %handle.job_id,
            timeout_secs = self.schedule.timeout.as_secs(),
            "Ingestion job did not finish in time"
        );
        job.terminate_with(
            JobState::TimedOut,
            format!(
                "no terminal status after {}s",
                started.elapsed().as_secs()
            ),
        );
        job
    }
}
