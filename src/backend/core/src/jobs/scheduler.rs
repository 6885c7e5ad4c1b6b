//! The scheduler loop: periodic due-time evaluation and dispatch.
//!
//! A single long-lived task ticks on a fixed cadence (independent of any
//! job's own frequency). Each tick scans the registry for enabled jobs
//! whose next due time has passed and that are not currently running,
//! orders them by priority, and dispatches each to the execution engine
//! fire-and-forget. The loop never waits on a job's completion, so a slow
//! job cannot delay due-time evaluation for the others.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::observability::EngineEvent;

use super::executor::{ExecutionOutcome, JobExecutor};
use super::job::{JobDefinition, Trigger};
use super::registry::JobRegistry;
use super::tracker::StatusTracker;

/// The periodic scheduling loop.
pub struct SchedulerLoop {
    registry: Arc<JobRegistry>,
    tracker: Arc<StatusTracker>,
    executor: Arc<JobExecutor>,
    tick_interval: Duration,
}

impl SchedulerLoop {
    /// Create a loop over the shared engine components.
    pub fn new(
        registry: Arc<JobRegistry>,
        tracker: Arc<StatusTracker>,
        executor: Arc<JobExecutor>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            executor,
            tick_interval,
        }
    }

    /// Compute the due set for `now`: enabled, not currently running, and
    /// past their next due time (never-run jobs are immediately due).
    ///
    /// Sorted by priority descending, with a stable id tie-break so
    /// dispatch order is deterministic. A job that is mid-flight is
    /// skipped, not queued; it is reconsidered on the next tick.
    pub fn collect_due(&self, now: DateTime<Utc>) -> Vec<JobDefinition> {
        let mut due: Vec<JobDefinition> = self
            .registry
            .all()
            .into_iter()
            .filter(|def| def.enabled)
            .filter(|def| !self.tracker.is_running(&def.id))
            .filter(|def| match self.tracker.last_result(&def.id) {
                None => true,
                Some(last) => def.next_due(last.started_at) <= now,
            })
            .collect();

        due.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Evaluate one tick: dispatch every due job on its own task.
    ///
    /// One job's dispatch failure never prevents the rest of the tick from
    /// being evaluated.
    fn tick(&self, now: DateTime<Utc>) {
        let due = self.collect_due(now);
        let due_count = due.len();
        let mut dispatched = 0usize;

        for def in due {
            let executor = Arc::clone(&self.executor);
            let job_id = def.id.clone();
            metrics::record_dispatch(&job_id);
            dispatched += 1;

            tokio::spawn(async move {
                match executor.execute(&job_id, Trigger::Scheduled).await {
                    Ok(ExecutionOutcome::Completed(result)) => {
                        tracing::debug!(
                            job_id = %job_id,
                            status = %result.status,
                            "Scheduled run finished"
                        );
                    }
                    Ok(ExecutionOutcome::AlreadyRunning { .. }) => {
                        // Lost the race to a manual trigger between the due
                        // scan and the dispatch; nothing to do.
                    }
                    Err(error) => error.log(),
                }
            });
        }

        EngineEvent::SchedulerTick {
            due: due_count,
            dispatched,
        }
        .log();
    }

    /// Spawn the loop, returning a handle for shutdown.
    ///
    /// The first tick fires immediately, so never-run jobs are evaluated
    /// at startup without waiting a full interval.
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                tick_interval_ms = self.tick_interval.as_millis() as u64,
                "Scheduler loop started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => self.tick(Utc::now()),
                }
            }

            EngineEvent::SchedulerShutdown {
                in_flight: self.tracker.running_count(),
            }
            .log();
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Handle for controlling a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop ticking.
    ///
    /// In-flight job executions are not cancelled; they finish or hit
    /// their own timeout.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the loop task to exit after shutdown.
    pub async fn stopped(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{
        Frequency, JobContext, JobHandler, JobOutcome, JobRunResult, RunStatus,
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn execute(&self, _ctx: &JobContext) -> JobOutcome {
            Ok(None)
        }
    }

    fn definition(id: &str) -> JobDefinition {
        JobDefinition::new(id, id, Arc::new(NoopHandler))
    }

    fn scheduler(registry: Arc<JobRegistry>, tracker: Arc<StatusTracker>) -> SchedulerLoop {
        let executor = Arc::new(JobExecutor::new(Arc::clone(&registry), Arc::clone(&tracker)));
        SchedulerLoop::new(registry, tracker, executor, Duration::from_secs(60))
    }

    fn record_run_at(tracker: &StatusTracker, job_id: &str, started_at: DateTime<Utc>) {
        tracker.record(JobRunResult {
            run_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            started_at,
            finished_at: started_at,
            duration_ms: 1,
            status: RunStatus::Success,
            attempts: 1,
            output: None,
            error: None,
        });
    }

    #[test]
    fn test_never_run_job_is_due_immediately() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry
            .register(definition("vacuum").with_frequency(Frequency::Weekly))
            .unwrap();

        let due = scheduler(registry, tracker).collect_due(Utc::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "vacuum");
    }

    #[test]
    fn test_due_time_idempotence() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry
            .register(definition("daily-report").with_frequency(Frequency::Daily))
            .unwrap();

        let last_start = Utc::now();
        record_run_at(&tracker, "daily-report", last_start);
        let scheduler = scheduler(registry, tracker);

        // Not due anywhere inside the 24h window
        assert!(scheduler
            .collect_due(last_start + chrono::Duration::hours(23))
            .is_empty());

        // Due at and after the full interval
        assert_eq!(
            scheduler
                .collect_due(last_start + chrono::Duration::hours(24))
                .len(),
            1
        );
        assert_eq!(
            scheduler
                .collect_due(last_start + chrono::Duration::hours(30))
                .len(),
            1
        );
    }

    #[test]
    fn test_priority_ordering_with_id_tie_break() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry.register(definition("b-low").with_priority(1)).unwrap();
        registry.register(definition("a-high").with_priority(10)).unwrap();
        registry.register(definition("a-low").with_priority(1)).unwrap();

        let due = scheduler(registry, tracker).collect_due(Utc::now());
        let ids: Vec<&str> = due.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a-high", "a-low", "b-low"]);
    }

    #[test]
    fn test_disabled_job_not_selected() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry.register(definition("off").disabled()).unwrap();

        assert!(scheduler(registry, tracker).collect_due(Utc::now()).is_empty());
    }

    #[test]
    fn test_running_job_skipped_not_queued() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry.register(definition("busy")).unwrap();

        tracker.try_begin("busy", Uuid::new_v4()).unwrap();
        let scheduler = scheduler(registry, Arc::clone(&tracker));
        assert!(scheduler.collect_due(Utc::now()).is_empty());

        // Reconsidered once the in-flight run finishes
        tracker.finish("busy");
        assert_eq!(scheduler.collect_due(Utc::now()).len(), 1);
    }

    #[test]
    fn test_reenabled_overdue_job_gets_one_catchup_run() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry
            .register(definition("catchup").with_frequency(Frequency::Hourly))
            .unwrap();

        // Ran once, then sat disabled well past several intervals.
        let last_start = Utc::now() - chrono::Duration::hours(10);
        record_run_at(&tracker, "catchup", last_start);
        registry.set_enabled("catchup", false);

        let scheduler = scheduler(Arc::clone(&registry), Arc::clone(&tracker));
        assert!(scheduler.collect_due(Utc::now()).is_empty());

        // Re-enabling yields exactly one immediate catch-up selection, and
        // a fresh run re-anchors the schedule.
        registry.set_enabled("catchup", true);
        let now = Utc::now();
        assert_eq!(scheduler.collect_due(now).len(), 1);

        record_run_at(&tracker, "catchup", now);
        assert!(scheduler.collect_due(now + chrono::Duration::minutes(30)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_dispatches_and_shuts_down() {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(10));
        registry
            .register(definition("tick-me").with_frequency(Frequency::Hourly))
            .unwrap();

        let handle = scheduler(Arc::clone(&registry), Arc::clone(&tracker)).spawn();

        // First tick fires immediately; give the dispatched task a chance
        // to run to completion.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.history("tick-me").len(), 1);

        // No re-dispatch before the job's interval elapses.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(tracker.history("tick-me").len(), 1);

        handle.stopped().await;
    }
}
