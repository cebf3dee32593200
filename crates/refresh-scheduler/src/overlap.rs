//! Overlap handling for scheduled runs.
//!
//! A refresh run can outlast the gap between triggers (a manual trigger
//! right after the daily one, or a run stuck near its timeout). The guard
//! decides whether the later trigger runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What to do when a trigger fires while the previous run is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the new trigger and record it as skipped.
    #[default]
    Skip,

    /// Run anyway. Only safe for jobs without shared external state.
    Concurrent,
}

/// Tracks whether a job is running.
pub struct OverlapGuard {
    is_running: Arc<AtomicBool>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// Claim the job for one run.
    ///
    /// Under `Skip`, returns `None` while another [`RunGuard`] is alive.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        match self.policy {
            OverlapPolicy::Skip => self
                .is_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| RunGuard {
                    flag: self.is_running.clone(),
                }),
            OverlapPolicy::Concurrent => Some(RunGuard {
                flag: Arc::new(AtomicBool::new(true)),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// Releases the running flag on drop, including when the run panics or is
/// cancelled by a timeout.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_skip_blocks_second_run() {
        let guard = OverlapGuard::new(OverlapPolicy::Skip);

        let first = guard.try_acquire();
        assert!(first.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(first);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_always_acquires() {
        let guard = OverlapGuard::new(OverlapPolicy::Concurrent);
        let a = guard.try_acquire();
        let b = guard.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert_eq!(guard.policy(), OverlapPolicy::Concurrent);
    }

    #[test]
    fn test_skip_single_winner_across_threads() {
        let guard = Arc::new(OverlapGuard::new(OverlapPolicy::Skip));
        let winners = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if let Some(_run) = guard.try_acquire() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(winners.load(Ordering::SeqCst) >= 1);
        assert!(!guard.is_running());
    }

    #[test]
    fn test_guard_released_after_panic() {
        let guard = Arc::new(OverlapGuard::new(OverlapPolicy::Skip));
        let inner = guard.clone();
        let result = thread::spawn(move || {
            let _run = inner.try_acquire();
            panic!("run failed");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_running());
    }
}
