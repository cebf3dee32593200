//! Random start delay for scheduled runs.
//!
//! Spreads triggers from several deployments sharing one knowledge-index
//! account so their ingestion jobs do not all start on the same second.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound on the random delay before a run.
///
/// ```
/// use refresh_scheduler::JitterConfig;
///
/// let config = JitterConfig::new(30);
/// assert!(config.generate_jitter() < std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum delay in seconds; 0 disables jitter.
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// A delay in `[0, max_jitter_secs)` at millisecond resolution.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Sleep for a random jitter, then await `job_fn`.
pub async fn with_jitter<F, T>(max_jitter_secs: u64, job_fn: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let jitter = JitterConfig::new(max_jitter_secs).generate_jitter();
    if !jitter.is_zero() {
        tracing::debug!(jitter_ms = jitter.as_millis() as u64, "Delaying run");
        tokio::time::sleep(jitter).await;
    }
    job_fn.await
}
