//! History and status tracking.
//!
//! The tracker exclusively owns the running set and the per-job run
//! history. All mutation goes through the execution engine (and the
//! operator clear-locks escape hatch); everything else reads.
//!
//! The running set is the engine's mutual-exclusion ground truth:
//! `try_begin` is an atomic per-id compare-and-set, not a best-effort
//! check. Two concurrent triggers for the same id resolve to exactly one
//! winner.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

use crate::observability::metrics;

use super::job::JobRunResult;

/// A currently executing attempt sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJob {
    /// Job id
    pub job_id: String,
    /// Attempt sequence id
    pub run_id: Uuid,
    /// When the dispatch began
    pub started_at: DateTime<Utc>,
}

/// Tracks the running set and a bounded run history per job id.
pub struct StatusTracker {
    running: DashMap<String, RunningJob>,
    histories: RwLock<HashMap<String, VecDeque<JobRunResult>>>,
    history_limit: usize,
}

impl StatusTracker {
    /// Create a tracker retaining at most `history_limit` results per id.
    pub fn new(history_limit: usize) -> Self {
        Self {
            running: DashMap::new(),
            histories: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Running set
    // ─────────────────────────────────────────────────────────────────────────

    /// Atomically mark a job as running.
    ///
    /// Returns `Err` with the in-flight entry if the id is already running;
    /// the caller must not start a handler in that case.
    pub fn try_begin(&self, job_id: &str, run_id: Uuid) -> Result<RunningJob, RunningJob> {
        match self.running.entry(job_id.to_string()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(vacant) => {
                let entry = RunningJob {
                    job_id: job_id.to_string(),
                    run_id,
                    started_at: Utc::now(),
                };
                vacant.insert(entry.clone());
                metrics::set_jobs_running(self.running.len() as u64);
                Ok(entry)
            }
        }
    }

    /// Clear a job's running flag.
    pub fn finish(&self, job_id: &str) {
        self.running.remove(job_id);
        metrics::set_jobs_running(self.running.len() as u64);
    }

    /// Check whether a job is currently executing.
    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains_key(job_id)
    }

    /// All currently executing jobs.
    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.running
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of currently executing jobs.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Running entries whose age exceeds their job's timeout.
    ///
    /// Computed at query time from start times; `timeout_of` supplies each
    /// job's configured timeout, with `fallback` used when the definition
    /// is no longer resolvable.
    pub fn stuck_jobs<F>(&self, timeout_of: F, fallback: Duration, now: DateTime<Utc>) -> Vec<RunningJob>
    where
        F: Fn(&str) -> Option<Duration>,
    {
        self.running
            .iter()
            .filter(|entry| {
                let job = entry.value();
                let timeout = timeout_of(&job.job_id).unwrap_or(fallback);
                let age = now.signed_duration_since(job.started_at);
                chrono::Duration::from_std(timeout)
                    .map(|threshold| age > threshold)
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Force-clear every running flag, returning the cleared entries.
    ///
    /// Operator escape hatch for stuck in-memory state; normal operation
    /// never calls this.
    pub fn clear_running(&self) -> Vec<RunningJob> {
        let cleared: Vec<RunningJob> = self
            .running
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.running.clear();
        metrics::set_jobs_running(0);
        cleared
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a result to the job's history and set it as the last result.
    ///
    /// Oldest entries are evicted once the per-id cap is reached.
    pub fn record(&self, result: JobRunResult) {
        let mut histories = self.histories.write();
        let history = histories.entry(result.job_id.clone()).or_default();
        if history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(result);
    }

    /// The most recent result for a job, if it has ever run.
    pub fn last_result(&self, job_id: &str) -> Option<JobRunResult> {
        self.histories
            .read()
            .get(job_id)
            .and_then(|history| history.back().cloned())
    }

    /// The retained run history for a job, oldest first.
    pub fn history(&self, job_id: &str) -> Vec<JobRunResult> {
        self.histories
            .read()
            .get(job_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::RunStatus;

    fn result(job_id: &str, status: RunStatus) -> JobRunResult {
        let now = Utc::now();
        JobRunResult {
            run_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 1,
            status,
            attempts: 1,
            output: None,
            error: None,
        }
    }

    #[test]
    fn test_try_begin_is_exclusive() {
        let tracker = StatusTracker::new(10);
        let first = tracker.try_begin("a", Uuid::new_v4());
        assert!(first.is_ok());

        let second = tracker.try_begin("a", Uuid::new_v4());
        let existing = second.unwrap_err();
        assert_eq!(existing.run_id, first.unwrap().run_id);

        // A different id is unaffected.
        assert!(tracker.try_begin("b", Uuid::new_v4()).is_ok());
        assert_eq!(tracker.running_count(), 2);
    }

    #[test]
    fn test_finish_clears_running() {
        let tracker = StatusTracker::new(10);
        tracker.try_begin("a", Uuid::new_v4()).unwrap();
        assert!(tracker.is_running("a"));

        tracker.finish("a");
        assert!(!tracker.is_running("a"));
        assert!(tracker.try_begin("a", Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_history_bounded_oldest_first() {
        let tracker = StatusTracker::new(3);
        for i in 0..5 {
            let mut r = result("a", RunStatus::Success);
            r.attempts = i + 1;
            tracker.record(r);
        }

        let history = tracker.history("a");
        assert_eq!(history.len(), 3);
        // Oldest two evicted
        assert_eq!(history[0].attempts, 3);
        assert_eq!(history[2].attempts, 5);
        assert_eq!(tracker.last_result("a").unwrap().attempts, 5);
    }

    #[test]
    fn test_last_result_none_when_never_run() {
        let tracker = StatusTracker::new(10);
        assert!(tracker.last_result("never").is_none());
        assert!(tracker.history("never").is_empty());
    }

    #[test]
    fn test_stuck_jobs() {
        let tracker = StatusTracker::new(10);
        tracker.try_begin("slow", Uuid::new_v4()).unwrap();
        tracker.try_begin("fresh", Uuid::new_v4()).unwrap();

        // Query as if an hour has passed; "slow" allows 5 minutes, "fresh"
        // falls back to a generous default.
        let later = Utc::now() + chrono::Duration::hours(1);
        let stuck = tracker.stuck_jobs(
            |id| (id == "slow").then(|| Duration::from_secs(300)),
            Duration::from_secs(7200),
            later,
        );

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].job_id, "slow");
    }

    #[test]
    fn test_clear_running() {
        let tracker = StatusTracker::new(10);
        tracker.try_begin("a", Uuid::new_v4()).unwrap();
        tracker.try_begin("b", Uuid::new_v4()).unwrap();

        let cleared = tracker.clear_running();
        assert_eq!(cleared.len(), 2);
        assert_eq!(tracker.running_count(), 0);
    }
}
