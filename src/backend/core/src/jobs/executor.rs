//! Job execution with mutual exclusion, timeout, and retry.
//!
//! One call to [`JobExecutor::execute`] is one attempt sequence: the
//! initial handler invocation plus any retries, recorded as a single
//! `JobRunResult`. The invariant the whole engine exists to uphold is
//! enforced here: at most one concurrent attempt sequence per job id,
//! whether the trigger was the scheduler loop or a manual management call.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BursarError, Result};
use crate::observability::metrics;
use crate::observability::EngineEvent;

use super::job::{JobContext, JobDefinition, JobRunResult, RunStatus, Trigger};
use super::registry::JobRegistry;
use super::tracker::StatusTracker;

/// Outcome of an execution request.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// A new attempt sequence ran to termination.
    Completed(JobRunResult),
    /// The job was already mid-flight; no handler was invoked.
    ///
    /// The scheduler treats this as a silent skip; the management surface
    /// converts it into a conflict error for explicit triggers.
    AlreadyRunning {
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
    },
}

/// Runs job handlers under the engine's execution discipline.
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    tracker: Arc<StatusTracker>,
}

impl JobExecutor {
    /// Create an executor over the shared registry and tracker.
    pub fn new(registry: Arc<JobRegistry>, tracker: Arc<StatusTracker>) -> Self {
        Self { registry, tracker }
    }

    /// Run one attempt sequence for a job.
    ///
    /// Disabled jobs execute normally here: the enabled flag gates the
    /// scheduler, not the capability.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id. Handler failures never
    /// surface as errors; they are folded into the returned result.
    pub async fn execute(&self, job_id: &str, trigger: Trigger) -> Result<ExecutionOutcome> {
        let def = self
            .registry
            .get(job_id)
            .ok_or_else(|| BursarError::job_not_found(job_id))?;

        let run_id = Uuid::new_v4();
        if let Err(existing) = self.tracker.try_begin(job_id, run_id) {
            EngineEvent::RunSkipped {
                job_id: job_id.to_string(),
                reason: "already running".to_string(),
            }
            .log();
            return Ok(ExecutionOutcome::AlreadyRunning {
                run_id: existing.run_id,
                started_at: existing.started_at,
            });
        }

        EngineEvent::RunStarted {
            job_id: def.id.clone(),
            run_id: run_id.to_string(),
            trigger: trigger.to_string(),
        }
        .log();

        let result = self.run_attempts(&def, run_id, trigger).await;

        // Record before clearing the running flag so a scheduler tick never
        // observes the job as idle with a stale last result.
        self.tracker.record(result.clone());
        self.tracker.finish(job_id);

        metrics::record_job_run(
            &def.id,
            &result.status.to_string(),
            result.duration().as_secs_f64(),
        );
        EngineEvent::RunCompleted {
            job_id: def.id.clone(),
            run_id: run_id.to_string(),
            status: result.status.to_string(),
            attempts: result.attempts,
            duration_ms: result.duration_ms,
        }
        .log();

        Ok(ExecutionOutcome::Completed(result))
    }

    /// The attempt loop: invoke the handler up to `1 + retry_count` times.
    ///
    /// - A failure within the timeout is retried after `retry_delay`,
    ///   unless the error is non-retryable or attempts are exhausted.
    /// - A timeout is terminal: the handler future is dropped at the
    ///   deadline, the context token is cancelled, and no retry follows.
    ///   Retrying a stuck handler is assumed unsafe; the job becomes due
    ///   again only after its full interval elapses from this start time.
    /// - A panicking handler is contained and recorded as a failure.
    async fn run_attempts(
        &self,
        def: &JobDefinition,
        run_id: Uuid,
        trigger: Trigger,
    ) -> JobRunResult {
        let started_at = Utc::now();
        let max_attempts = def.retry_count.saturating_add(1);

        let mut attempts = 0;
        let mut status = RunStatus::Failure;
        let mut output = None;
        let mut error = None;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let ctx = JobContext::new(&def.id, run_id, attempt, trigger);
            let deadline_token = ctx.cancellation();
            metrics::record_attempt(&def.id);

            let invocation = AssertUnwindSafe(def.handler.execute(&ctx)).catch_unwind();
            match tokio::time::timeout(def.timeout, invocation).await {
                Ok(Ok(Ok(payload))) => {
                    status = RunStatus::Success;
                    output = payload;
                    error = None;
                    break;
                }
                Ok(Ok(Err(handler_error))) => {
                    tracing::warn!(
                        job_id = %def.id,
                        run_id = %run_id,
                        attempt,
                        retryable = handler_error.retryable,
                        error = %handler_error,
                        "Job attempt failed"
                    );
                    error = Some(handler_error.to_string());

                    if !handler_error.retryable {
                        break;
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(def.retry_delay).await;
                    }
                }
                Ok(Err(panic)) => {
                    let message = panic_message(panic);
                    tracing::error!(
                        job_id = %def.id,
                        run_id = %run_id,
                        attempt,
                        error = %message,
                        "Job handler panicked"
                    );
                    error = Some(format!("handler panicked: {}", message));
                    break;
                }
                Err(_) => {
                    // The handler future was dropped at the deadline; the
                    // token lets any detached work it spawned observe it.
                    deadline_token.cancel();
                    tracing::warn!(
                        job_id = %def.id,
                        run_id = %run_id,
                        attempt,
                        timeout_ms = def.timeout.as_millis() as u64,
                        "Job attempt timed out"
                    );
                    status = RunStatus::Timeout;
                    error = Some(format!(
                        "timed out after {}ms",
                        def.timeout.as_millis()
                    ));
                    break;
                }
            }
        }

        let finished_at = Utc::now();
        let duration_ms = finished_at
            .signed_duration_since(started_at)
            .num_milliseconds()
            .max(0) as u64;

        JobRunResult {
            run_id,
            job_id: def.id.clone(),
            started_at,
            finished_at,
            duration_ms,
            status,
            attempts,
            output,
            error,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
