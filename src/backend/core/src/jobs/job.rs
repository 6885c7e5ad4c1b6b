//! Job definitions and traits.
//!
//! This module provides the core abstractions for defining background jobs:
//!
//! - **JobHandler trait**: The opaque unit of work every job carries
//! - **JobDefinition**: Static description of a job (schedule, policy, handler)
//! - **JobContext**: Context passed to handlers during execution
//! - **JobRunResult**: The structured outcome of one attempt sequence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Frequency
// ═══════════════════════════════════════════════════════════════════════════════

/// How often a job recurs.
///
/// All frequencies are fixed intervals measured from the start of the last
/// run; `Monthly` is a fixed 30 days, not calendar arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// Recur on the definition's `custom_interval` instead of a fixed cadence.
    Custom,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Terminal status of one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The handler returned normally within the timeout
    Success,
    /// The handler failed on every attempt (or aborted non-retryably)
    Failure,
    /// The handler exceeded the job's timeout; no retries follow a timeout
    Timeout,
}

impl RunStatus {
    /// Check whether the run completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trigger
// ═══════════════════════════════════════════════════════════════════════════════

/// What caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The scheduler loop selected the job as due
    Scheduled,
    /// An operator forced the run through the management surface
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for handler failures.
///
/// Contained inside the execution engine: it never propagates past the
/// attempt loop except folded into `JobRunResult::error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl HandlerError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    ///
    /// A fatal error aborts the attempt sequence even when retries remain.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for HandlerError {}

/// Result type for a single handler invocation.
///
/// `Ok(Some(value))` carries a handler-defined output payload.
pub type JobOutcome = std::result::Result<Option<serde_json::Value>, HandlerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to handlers during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Id of the job being run
    pub job_id: String,
    /// Id of this attempt sequence
    pub run_id: Uuid,
    /// Current attempt number (1-indexed)
    pub attempt: u32,
    /// What caused this dispatch
    pub trigger: Trigger,
    /// Cancelled when the run's deadline passes or the engine shuts down
    cancellation: CancellationToken,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job_id: impl Into<String>, run_id: Uuid, attempt: u32, trigger: Trigger) -> Self {
        Self {
            job_id: job_id.into(),
            run_id,
            attempt,
            trigger,
            cancellation: CancellationToken::new(),
        }
    }

    /// The cancellation token for this run.
    ///
    /// Handlers that detach background work should hand it a clone so the
    /// work can observe the deadline.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Log a message associated with this run.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this run.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            attempt = self.attempt,
            message
        );
    }

    /// Log an error associated with this run.
    pub fn log_error(&self, message: &str) {
        tracing::error!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handler Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The opaque unit of work a job carries.
///
/// The engine never inspects a handler's internals, only its timing and
/// outcome.
///
/// # Errors
///
/// Return `HandlerError::retryable()` for transient failures that should be
/// retried, and `HandlerError::fatal()` for permanent failures that should
/// abort the attempt sequence.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the unit of work.
    async fn execute(&self, ctx: &JobContext) -> JobOutcome;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// Static description of a job: identity, schedule, execution policy, and
/// the handler reference.
///
/// Created once at registration; only `enabled` is mutated afterwards (by
/// the registry, through enable/disable).
#[derive(Clone)]
pub struct JobDefinition {
    /// Globally unique, stable identity
    pub id: String,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Owning group, used by `run_group` and the registry's group query
    pub group: String,
    /// Recurrence cadence
    pub frequency: Frequency,
    /// Interval used when `frequency` is `Custom`
    pub custom_interval: Option<Duration>,
    /// Higher runs first when multiple jobs are simultaneously due
    pub priority: i32,
    /// Maximum wall-clock duration of a single attempt
    pub timeout: Duration,
    /// Maximum additional attempts after an initial failure
    pub retry_count: u32,
    /// Wait between a failed attempt and the next retry
    pub retry_delay: Duration,
    /// Disabled jobs are never scheduled but remain force-runnable
    pub enabled: bool,
    /// The unit of work
    pub handler: Arc<dyn JobHandler>,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("frequency", &self.frequency)
            .field("custom_interval", &self.custom_interval)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl JobDefinition {
    /// Create a new definition with defaults: daily, priority 0, 5 minute
    /// timeout, no retries, enabled.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            group: "default".to_string(),
            frequency: Frequency::Daily,
            custom_interval: None,
            priority: 0,
            timeout: Duration::from_secs(300),
            retry_count: 0,
            retry_delay: Duration::from_secs(30),
            enabled: true,
            handler,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the owning group.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the recurrence frequency.
    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Recur on a custom interval instead of a fixed cadence.
    pub fn every(mut self, interval: Duration) -> Self {
        self.frequency = Frequency::Custom;
        self.custom_interval = Some(interval);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the delay between retries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Start disabled (schedule suppressed until enabled).
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The recurrence interval implied by the frequency.
    pub fn interval(&self) -> Duration {
        match self.frequency {
            Frequency::Hourly => Duration::from_secs(60 * 60),
            Frequency::Daily => Duration::from_secs(24 * 60 * 60),
            Frequency::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            Frequency::Monthly => Duration::from_secs(30 * 24 * 60 * 60),
            // Registration rejects Custom definitions without an interval.
            Frequency::Custom => self.custom_interval.unwrap_or(Duration::from_secs(60 * 60)),
        }
    }

    /// The next instant this job becomes due after a run started at
    /// `last_start`.
    ///
    /// Intervals too large to represent push the due time to the end of
    /// representable time (never due).
    pub fn next_due(&self, last_start: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.interval())
            .ok()
            .and_then(|delta| last_start.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Validate the definition's invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        match (self.frequency, self.custom_interval) {
            (Frequency::Custom, None) => {
                Err("custom frequency requires a custom interval".to_string())
            }
            (Frequency::Custom, Some(interval)) if interval.is_zero() => {
                Err("custom interval must be positive".to_string())
            }
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Run Result
// ═══════════════════════════════════════════════════════════════════════════════

/// The structured outcome of one attempt sequence (including all retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunResult {
    /// Unique id of this attempt sequence
    pub run_id: Uuid,
    /// Id of the job that ran
    pub job_id: String,
    /// When the dispatch began
    pub started_at: DateTime<Utc>,
    /// When the attempt sequence terminated
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Terminal status
    pub status: RunStatus,
    /// Handler invocations used (1 + retries)
    pub attempts: u32,
    /// Handler-defined output payload, if any
    pub output: Option<serde_json::Value>,
    /// Failure detail, if the run did not succeed
    pub error: Option<String>,
}

impl JobRunResult {
    /// Wall-clock duration of the attempt sequence.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
