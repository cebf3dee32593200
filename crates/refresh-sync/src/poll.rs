//! Fixed-interval poll schedule bounded by a wall-clock budget.

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use tokio::time::Instant;

use refresh_types::IngestionSettings;

/// Poll interval and overall timeout for one ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Most status polls one job can receive: `ceil(timeout / interval)`.
    pub fn max_attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let interval = self.interval.as_millis();
        self.timeout.as_millis().div_ceil(interval).max(1) as u32
    }

    /// Start a poll window at the current instant.
    pub fn start(&self) -> PollWindow {
        self.start_at(Instant::now())
    }

    /// Start a poll window whose budget began at `anchor`.
    ///
    /// Time already spent since `anchor` counts against the timeout.
    pub fn start_at(&self, anchor: Instant) -> PollWindow {
        PollWindow {
            backoff: Constant::new(self.interval),
            interval: self.interval,
            deadline: anchor + self.timeout,
            attempts: 0,
            max_attempts: self.max_attempts(),
        }
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(600))
    }
}

impl From<&IngestionSettings> for PollSchedule {
    fn from(settings: &IngestionSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.poll_interval_secs),
            Duration::from_secs(settings.job_timeout_secs),
        )
    }
}

/// One running poll window.
pub struct PollWindow {
    backoff: Constant,
    interval: Duration,
    deadline: Instant,
    attempts: u32,
    max_attempts: u32,
}

impl PollWindow {
    /// Sleep until the next poll is due.
    ///
    /// Returns `false` once the budget is spent, without sleeping. A wait
    /// that would cross the deadline is shortened to end at the deadline.
    pub async fn wait_next(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        let now = Instant::now();
        let delay = self.backoff.next_backoff().unwrap_or(self.interval);
        let delay = delay.min(self.deadline.saturating_duration_since(now));
        tokio::time::sleep(delay).await;
        self.attempts += 1;
        true
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts || Instant::now() >= self.deadline
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}
