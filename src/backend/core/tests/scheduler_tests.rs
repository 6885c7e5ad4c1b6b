//! Integration tests for scheduler due-time evaluation and dispatch.
//!
//! Due-window arithmetic is exercised through `collect_due` with explicit
//! instants; the spawned-loop tests cover first-tick dispatch, disable
//! semantics, and shutdown.

use async_trait::async_trait;
use bursar_core::config::Config;
use bursar_core::jobs::{
    Frequency, JobContext, JobDefinition, JobEngine, JobExecutor, JobHandler, JobOutcome,
    JobRegistry, JobRunResult, RunStatus, SchedulerLoop, StatusTracker,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

struct CountingHandler {
    invocations: AtomicU32,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
        })
    }

    fn count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn execute(&self, _ctx: &JobContext) -> JobOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

fn definition(id: &str) -> JobDefinition {
    JobDefinition::new(id, id, CountingHandler::new())
}

struct Components {
    registry: Arc<JobRegistry>,
    tracker: Arc<StatusTracker>,
}

impl Components {
    fn new() -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            tracker: Arc::new(StatusTracker::new(10)),
        }
    }

    fn scheduler(&self) -> SchedulerLoop {
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.tracker),
        ));
        SchedulerLoop::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.tracker),
            executor,
            Duration::from_secs(60),
        )
    }

    fn record_run_at(&self, job_id: &str, started_at: DateTime<Utc>) {
        self.tracker.record(JobRunResult {
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
}

// ============================================================================
// Due-Window Arithmetic
// ============================================================================

#[test]
fn daily_job_due_only_after_full_interval() {
    let components = Components::new();
    components
        .registry
        .register(definition("daily").with_frequency(Frequency::Daily))
        .unwrap();

    let last_start = Utc::now();
    components.record_run_at("daily", last_start);
    let scheduler = components.scheduler();

    for hours in [1, 12, 23] {
        assert!(
            scheduler
                .collect_due(last_start + ChronoDuration::hours(hours))
                .is_empty(),
            "due {}h after start",
            hours
        );
    }
    assert_eq!(
        scheduler
            .collect_due(last_start + ChronoDuration::hours(24))
            .len(),
        1
    );
    assert_eq!(
        scheduler
            .collect_due(last_start + ChronoDuration::days(3))
            .len(),
        1
    );
}

#[test]
fn custom_interval_governs_due_time() {
    let components = Components::new();
    components
        .registry
        .register(definition("every-90s").every(Duration::from_secs(90)))
        .unwrap();

    let last_start = Utc::now();
    components.record_run_at("every-90s", last_start);
    let scheduler = components.scheduler();

    assert!(scheduler
        .collect_due(last_start + ChronoDuration::seconds(89))
        .is_empty());
    assert_eq!(
        scheduler
            .collect_due(last_start + ChronoDuration::seconds(90))
            .len(),
        1
    );
}

#[test]
fn failed_and_timed_out_runs_still_anchor_the_schedule() {
    let components = Components::new();
    components
        .registry
        .register(definition("flappy").with_frequency(Frequency::Hourly))
        .unwrap();

    // A timed-out run counts as a run: the job is throttled for the full
    // interval from its (failed) start, not hot-looped.
    let last_start = Utc::now();
    components.tracker.record(JobRunResult {
        run_id: Uuid::new_v4(),
        job_id: "flappy".to_string(),
        started_at: last_start,
        finished_at: last_start + ChronoDuration::seconds(30),
        duration_ms: 30_000,
        status: RunStatus::Timeout,
        attempts: 1,
        output: None,
        error: Some("timed out after 30000ms".to_string()),
    });

    let scheduler = components.scheduler();
    assert!(scheduler
        .collect_due(last_start + ChronoDuration::minutes(59))
        .is_empty());
    assert_eq!(
        scheduler
            .collect_due(last_start + ChronoDuration::minutes(60))
            .len(),
        1
    );
}

// ============================================================================
// Selection & Ordering
// ============================================================================

#[test]
fn never_run_weekly_job_is_due_on_first_evaluation() {
    let components = Components::new();
    components
        .registry
        .register(definition("vacuum").with_frequency(Frequency::Weekly))
        .unwrap();

    let due = components.scheduler().collect_due(Utc::now());
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "vacuum");
}

#[test]
fn simultaneous_due_jobs_start_in_priority_order() {
    let components = Components::new();
    components
        .registry
        .register(definition("b-critical").with_priority(10))
        .unwrap();
    components
        .registry
        .register(definition("a-background").with_priority(1))
        .unwrap();
    components
        .registry
        .register(definition("a-critical").with_priority(10))
        .unwrap();

    let due = components.scheduler().collect_due(Utc::now());
    let ids: Vec<&str> = due.iter().map(|def| def.id.as_str()).collect();
    assert_eq!(ids, vec!["a-critical", "b-critical", "a-background"]);
}

#[test]
fn running_and_disabled_jobs_are_not_selected() {
    let components = Components::new();
    components.registry.register(definition("busy")).unwrap();
    components
        .registry
        .register(definition("off").disabled())
        .unwrap();
    components
        .tracker
        .try_begin("busy", Uuid::new_v4())
        .unwrap();

    assert!(components.scheduler().collect_due(Utc::now()).is_empty());

    // The busy job is reconsidered after it finishes; the disabled one
    // only after re-enable.
    components.tracker.finish("busy");
    let due = components.scheduler().collect_due(Utc::now());
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "busy");

    components.registry.set_enabled("off", true);
    assert_eq!(components.scheduler().collect_due(Utc::now()).len(), 2);
}

// ============================================================================
// Live Loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn first_tick_dispatches_never_run_jobs() {
    let mut config = Config::default();
    config.scheduler.tick_interval = Duration::from_secs(1);
    let engine = JobEngine::new(&config);

    let handler = CountingHandler::new();
    engine
        .register_job(JobDefinition::new("startup", "Startup", handler.clone()))
        .unwrap();

    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.count(), 1);
    assert_eq!(
        engine.job_details("startup").unwrap().history.len(),
        1
    );
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn disabled_job_skipped_by_loop_but_force_runnable() {
    let mut config = Config::default();
    config.scheduler.tick_interval = Duration::from_secs(1);
    let engine = JobEngine::new(&config);

    let handler = CountingHandler::new();
    engine
        .register_job(
            JobDefinition::new("benched", "Benched", handler.clone()).disabled(),
        )
        .unwrap();

    engine.start().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handler.count(), 0);

    // Force-run works regardless of the enabled flag, and records a result.
    let result = engine.run_job("benched").await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(handler.count(), 1);
    assert_eq!(engine.job_details("benched").unwrap().history.len(), 1);

    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_timer_not_the_capability() {
    let mut config = Config::default();
    config.scheduler.tick_interval = Duration::from_secs(1);
    let engine = JobEngine::new(&config);

    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown();
    assert!(!engine.scheduler_active());

    // A job registered after shutdown never gets a tick...
    let handler = CountingHandler::new();
    engine
        .register_job(JobDefinition::new("late", "Late", handler.clone()))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(handler.count(), 0);

    // ...but manual execution still works.
    engine.run_job("late").await.unwrap();
    assert_eq!(handler.count(), 1);
}
