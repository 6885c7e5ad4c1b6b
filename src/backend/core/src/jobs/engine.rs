//! The job engine facade: the operator-facing management surface.
//!
//! `JobEngine` wires the registry, tracker, executor, and scheduler loop
//! together and is the single handle the rest of the process needs. It is
//! constructed once at startup and passed by reference to whoever consumes
//! it (the transport layer, the admin surface, job managers); there is no
//! ambient global.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{Config, SchedulerConfig};
use crate::error::{BursarError, ErrorCode, Result};

use super::builtin::JobManager;
use super::executor::{ExecutionOutcome, JobExecutor};
use super::job::{Frequency, JobDefinition, JobRunResult, RunStatus, Trigger};
use super::registry::JobRegistry;
use super::scheduler::{SchedulerHandle, SchedulerLoop};
use super::tracker::{RunningJob, StatusTracker};

// ═══════════════════════════════════════════════════════════════════════════════
// Projections
// ═══════════════════════════════════════════════════════════════════════════════

/// Flattened job listing entry: registry definition joined with tracker
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub group: String,
    pub frequency: Frequency,
    pub priority: i32,
    pub enabled: bool,
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_duration_ms: Option<u64>,
}

/// Full definition view for the detail endpoint (handler omitted; it is
/// opaque).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub group: String,
    pub frequency: Frequency,
    #[serde(default, with = "humantime_serde::option")]
    pub custom_interval: Option<Duration>,
    pub priority: i32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry_count: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub enabled: bool,
}

impl From<&JobDefinition> for DefinitionView {
    fn from(def: &JobDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            group: def.group.clone(),
            frequency: def.frequency,
            custom_interval: def.custom_interval,
            priority: def.priority,
            timeout: def.timeout,
            retry_count: def.retry_count,
            retry_delay: def.retry_delay,
            enabled: def.enabled,
        }
    }
}

/// Definition, runtime status, and retained history for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub definition: DefinitionView,
    pub is_running: bool,
    pub last_result: Option<JobRunResult>,
    pub history: Vec<JobRunResult>,
}

/// A currently executing run, with its duration derived at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJobView {
    pub job_id: String,
    pub name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Report of an operator clear-locks sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedLocks {
    /// Every running flag that was force-cleared
    pub cleared: Vec<RunningJob>,
    /// Ids of entries old enough to be swept into history as failures
    pub swept: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// The background job engine: registry + scheduler + executor + tracker
/// behind one management surface.
pub struct JobEngine {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    tracker: Arc<StatusTracker>,
    executor: Arc<JobExecutor>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl JobEngine {
    /// Create an engine from configuration. The scheduler loop is not
    /// started until [`JobEngine::start`] is called.
    pub fn new(config: &Config) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let tracker = Arc::new(StatusTracker::new(config.scheduler.history_limit));
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));

        Self {
            config: config.scheduler.clone(),
            registry,
            tracker,
            executor,
            scheduler: Mutex::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a single job definition.
    pub fn register_job(&self, def: JobDefinition) -> Result<()> {
        self.registry.register(def)
    }

    /// Register every definition a domain job manager owns.
    ///
    /// Returns the number of jobs registered.
    pub fn register_manager(&self, manager: &dyn JobManager) -> Result<usize> {
        let defs = manager.definitions();
        let count = defs.len();
        for def in defs {
            self.registry.register(def.in_group(manager.group()))?;
        }
        tracing::info!(group = manager.group(), jobs = count, "Job manager registered");
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduler lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the scheduler loop.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerAlreadyStarted` if the loop is already running.
    pub fn start(&self) -> Result<()> {
        let mut guard = self.scheduler.lock();
        if guard.is_some() {
            return Err(BursarError::new(
                ErrorCode::SchedulerAlreadyStarted,
                "The scheduler loop is already running",
            ));
        }

        let handle = SchedulerLoop::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.tracker),
            Arc::clone(&self.executor),
            self.config.tick_interval,
        )
        .spawn();
        *guard = Some(handle);
        Ok(())
    }

    /// Whether the scheduler loop is currently running.
    pub fn scheduler_active(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .map(|handle| !handle.is_shutdown())
            .unwrap_or(false)
    }

    /// Stop the scheduler loop.
    ///
    /// In-flight executions are not cancelled; they finish or hit their
    /// own timeout ("drain, don't kill"). Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.shutdown();
        }
        tracing::info!(
            in_flight = self.tracker.running_count(),
            "Job engine shutdown requested"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Management surface
    // ─────────────────────────────────────────────────────────────────────────

    /// List every registered job, flattened with its runtime state.
    ///
    /// Sorted by id for stable output.
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .registry
            .all()
            .into_iter()
            .map(|def| self.summarize(&def))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Full detail for one job: definition, status, and history.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id.
    pub fn job_details(&self, job_id: &str) -> Result<JobDetails> {
        let def = self
            .registry
            .get(job_id)
            .ok_or_else(|| BursarError::job_not_found(job_id))?;

        Ok(JobDetails {
            definition: DefinitionView::from(&def),
            is_running: self.tracker.is_running(job_id),
            last_result: self.tracker.last_result(job_id),
            history: self.tracker.history(job_id),
        })
    }

    /// Force-run a job now, regardless of its enabled flag.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id and `JobAlreadyRunning` if
    /// the job is mid-flight: an explicit trigger surfaces the conflict
    /// rather than silently skipping, since a human asked for the run.
    pub async fn run_job(&self, job_id: &str) -> Result<JobRunResult> {
        match self.executor.execute(job_id, Trigger::Manual).await? {
            ExecutionOutcome::Completed(result) => Ok(result),
            ExecutionOutcome::AlreadyRunning { .. } => {
                Err(BursarError::job_already_running(job_id))
            }
        }
    }

    /// Enable or disable a job's schedule. Returns the new state.
    ///
    /// Disabling never cancels an in-flight run and never removes the
    /// job's force-run capability.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id.
    pub fn set_job_enabled(&self, job_id: &str, enabled: bool) -> Result<bool> {
        if self.registry.set_enabled(job_id, enabled) {
            Ok(enabled)
        } else {
            Err(BursarError::job_not_found(job_id))
        }
    }

    /// Run every job belonging to a group, concurrently.
    ///
    /// Mutual exclusion still applies per id; a member that is mid-flight
    /// yields a conflict error in the mapping. An unknown group yields an
    /// empty mapping.
    pub async fn run_group(&self, group: &str) -> HashMap<String, Result<JobRunResult>> {
        let defs = self.registry.jobs_by_group(group);
        let runs = defs.iter().map(|def| {
            let job_id = def.id.clone();
            async move { (job_id.clone(), self.run_job(&job_id).await) }
        });

        join_all(runs).await.into_iter().collect()
    }

    /// Currently executing jobs with durations derived at query time.
    pub fn running_jobs(&self) -> Vec<RunningJobView> {
        let now = Utc::now();
        let mut views: Vec<RunningJobView> = self
            .tracker
            .running_jobs()
            .into_iter()
            .map(|entry| self.running_view(entry, now))
            .collect();
        views.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        views
    }

    /// Running jobs older than their own timeout (or the configured
    /// fallback): the operationally actionable "stuck" set.
    pub fn stuck_jobs(&self) -> Vec<RunningJobView> {
        let now = Utc::now();
        self.tracker
            .stuck_jobs(
                |job_id| self.registry.get(job_id).map(|def| def.timeout),
                self.config.default_timeout,
                now,
            )
            .into_iter()
            .map(|entry| self.running_view(entry, now))
            .collect()
    }

    /// Force-clear every running flag (operator escape hatch).
    ///
    /// Entries older than `stale_after` are swept into history as terminal
    /// failures with an explanatory annotation; younger entries are only
    /// unflagged, since their handler task may legitimately still finish
    /// and record its own result.
    pub fn clear_locks(&self, stale_after: Duration) -> ClearedLocks {
        let now = Utc::now();
        let cleared = self.tracker.clear_running();
        let mut swept = Vec::new();

        for entry in &cleared {
            let age = now.signed_duration_since(entry.started_at);
            let stale = chrono::Duration::from_std(stale_after)
                .map(|threshold| age > threshold)
                .unwrap_or(false);
            if !stale {
                continue;
            }

            self.tracker.record(JobRunResult {
                run_id: entry.run_id,
                job_id: entry.job_id.clone(),
                started_at: entry.started_at,
                finished_at: now,
                duration_ms: age.num_milliseconds().max(0) as u64,
                status: RunStatus::Failure,
                attempts: 0,
                output: None,
                error: Some("cleared by operator: run exceeded staleness threshold".to_string()),
            });
            swept.push(entry.job_id.clone());
        }

        tracing::warn!(
            cleared = cleared.len(),
            swept = swept.len(),
            "Running locks force-cleared"
        );
        ClearedLocks { cleared, swept }
    }

    /// The configured staleness threshold for lock sweeps.
    pub fn lock_stale_after(&self) -> Duration {
        self.config.lock_stale_after
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of enabled jobs.
    pub fn enabled_count(&self) -> usize {
        self.registry.all().iter().filter(|def| def.enabled).count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────────

    fn summarize(&self, def: &JobDefinition) -> JobSummary {
        let last = self.tracker.last_result(&def.id);
        JobSummary {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            group: def.group.clone(),
            frequency: def.frequency,
            priority: def.priority,
            enabled: def.enabled,
            is_running: self.tracker.is_running(&def.id),
            last_run: last.as_ref().map(|r| r.started_at),
            last_status: last.as_ref().map(|r| r.status),
            last_duration_ms: last.as_ref().map(|r| r.duration_ms),
        }
    }

    fn running_view(&self, entry: RunningJob, now: DateTime<Utc>) -> RunningJobView {
        let name = self
            .registry
            .get(&entry.job_id)
            .map(|def| def.name)
            .unwrap_or_else(|| entry.job_id.clone());
        RunningJobView {
            job_id: entry.job_id,
            name,
            run_id: entry.run_id,
            started_at: entry.started_at,
            duration_ms: now
                .signed_duration_since(entry.started_at)
                .num_milliseconds()
                .max(0) as u64,
        }
    }
}
