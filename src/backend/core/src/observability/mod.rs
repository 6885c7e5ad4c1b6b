//! Observability: Metrics and Logging.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the observability stack.
///
/// Installs an `EnvFilter`-driven subscriber with either JSON or
/// human-readable formatting. Exporter wiring (Prometheus scrape endpoints,
/// trace collectors) belongs to the process bootstrap that embeds the
/// engine, not here.
pub fn init(log_level: &str, json_logging: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    self::metrics::register_metrics();

    Ok(())
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{
        counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    };

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(
            "bursar_job_runs_total",
            "Total number of job attempt sequences completed, by status"
        );
        describe_counter!(
            "bursar_job_attempts_total",
            "Total number of individual handler invocations"
        );
        describe_counter!(
            "bursar_job_dispatches_total",
            "Total number of scheduler dispatches"
        );
        describe_counter!(
            "bursar_errors_total",
            "Total number of engine errors constructed"
        );

        // Gauges
        describe_gauge!(
            "bursar_jobs_running",
            "Number of currently running job attempt sequences"
        );
        describe_gauge!(
            "bursar_jobs_registered",
            "Number of job definitions in the registry"
        );

        // Histograms
        describe_histogram!(
            "bursar_job_duration_seconds",
            "Job attempt sequence duration in seconds"
        );
    }

    /// Record a completed attempt sequence.
    pub fn record_job_run(job_id: &str, status: &str, duration_secs: f64) {
        counter!(
            "bursar_job_runs_total",
            "job_id" => job_id.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
        histogram!("bursar_job_duration_seconds", "job_id" => job_id.to_string())
            .record(duration_secs);
    }

    /// Record a single handler invocation.
    pub fn record_attempt(job_id: &str) {
        counter!("bursar_job_attempts_total", "job_id" => job_id.to_string()).increment(1);
    }

    /// Record a scheduler dispatch.
    pub fn record_dispatch(job_id: &str) {
        counter!("bursar_job_dispatches_total", "job_id" => job_id.to_string()).increment(1);
    }

    /// Update the running-jobs gauge.
    pub fn set_jobs_running(count: u64) {
        gauge!("bursar_jobs_running").set(count as f64);
    }

    /// Update the registered-jobs gauge.
    pub fn set_jobs_registered(count: u64) {
        gauge!("bursar_jobs_registered").set(count as f64);
    }
}

/// Structured event types for logging.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type")]
pub enum EngineEvent {
    JobRegistered {
        job_id: String,
        group: String,
        frequency: String,
    },
    RunStarted {
        job_id: String,
        run_id: String,
        trigger: String,
    },
    RunCompleted {
        job_id: String,
        run_id: String,
        status: String,
        attempts: u32,
        duration_ms: u64,
    },
    RunSkipped {
        job_id: String,
        reason: String,
    },
    SchedulerTick {
        due: usize,
        dispatched: usize,
    },
    SchedulerShutdown {
        in_flight: usize,
    },
}

impl EngineEvent {
    /// Log this event.
    pub fn log(&self) {
        match self {
            EngineEvent::JobRegistered { job_id, group, frequency } => {
                tracing::info!(
                    job_id = %job_id,
                    group = %group,
                    frequency = %frequency,
                    "Job registered"
                );
            }
            EngineEvent::RunStarted { job_id, run_id, trigger } => {
                tracing::info!(
                    job_id = %job_id,
                    run_id = %run_id,
                    trigger = %trigger,
                    "Job run started"
                );
            }
            EngineEvent::RunCompleted { job_id, run_id, status, attempts, duration_ms } => {
                tracing::info!(
                    job_id = %job_id,
                    run_id = %run_id,
                    status = %status,
                    attempts = %attempts,
                    duration_ms = %duration_ms,
                    "Job run completed"
                );
            }
            EngineEvent::RunSkipped { job_id, reason } => {
                tracing::debug!(
                    job_id = %job_id,
                    reason = %reason,
                    "Job run skipped"
                );
            }
            EngineEvent::SchedulerTick { due, dispatched } => {
                tracing::debug!(
                    due = %due,
                    dispatched = %dispatched,
                    "Scheduler tick"
                );
            }
            EngineEvent::SchedulerShutdown { in_flight } => {
                tracing::info!(
                    in_flight = %in_flight,
                    "Scheduler shut down"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = EngineEvent::RunCompleted {
            job_id: "cache-cleanup".to_string(),
            run_id: "run-1".to_string(),
            status: "success".to_string(),
            attempts: 1,
            duration_ms: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"RunCompleted\""));
        assert!(json.contains("cache-cleanup"));
    }
}
