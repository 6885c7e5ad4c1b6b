//! Error handling for Bursar Core.
//!
//! This module provides:
//! - Machine-readable error codes for the management surface
//! - HTTP status mapping consumed by the (external) transport layer
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use bursar_core::error::{BursarError, Result, ErrorContext};
//!
//! fn my_function() -> Result<()> {
//!     some_operation()
//!         .context("Failed to perform operation")?;
//!     Ok(())
//! }
//! ```
//!
//! Handler-level failures are a different animal: they are contained inside
//! the execution engine and surface only as `JobRunResult` data (see
//! `jobs::job::HandlerError`). `BursarError` is for the engine's own
//! surface: registration, management calls, configuration.

use http::StatusCode;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Bursar operations.
pub type Result<T> = std::result::Result<T, BursarError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for the management surface.
///
/// These codes are stable and can be used by callers for programmatic error
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    JobAlreadyRunning,
    JobDefinitionInvalid,
    JobExecutionFailed,
    JobTimeout,

    // Scheduler Errors (1100-1199)
    SchedulerStopped,
    SchedulerAlreadyStarted,

    // Serialization Errors (2000-2099)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Job Errors
            Self::JobNotFound => 1000,
            Self::JobAlreadyRunning => 1001,
            Self::JobDefinitionInvalid => 1002,
            Self::JobExecutionFailed => 1003,
            Self::JobTimeout => 1004,

            // Scheduler Errors
            Self::SchedulerStopped => 1100,
            Self::SchedulerAlreadyStarted => 1101,

            // Serialization Errors
            Self::SerializationError => 2000,
            Self::DeserializationError => 2001,

            // Configuration Errors
            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            // Internal Errors
            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code the transport layer should use for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound => StatusCode::NOT_FOUND,

            Self::JobAlreadyRunning | Self::SchedulerAlreadyStarted => StatusCode::CONFLICT,

            Self::JobDefinitionInvalid => StatusCode::UNPROCESSABLE_ENTITY,

            Self::JobTimeout => StatusCode::GATEWAY_TIMEOUT,

            Self::SchedulerStopped => StatusCode::SERVICE_UNAVAILABLE,

            Self::JobExecutionFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable by the caller.
    pub const fn is_retryable(&self) -> bool {
        // A run rejected because the job is mid-flight can simply be retried
        // once the in-flight attempt sequence terminates.
        matches!(self, Self::JobAlreadyRunning)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "scheduler",
            2000..=2099 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (unknown ids, bad definitions, rejected triggers)
    Low,
    /// Operational issues (timeouts, stopped scheduler)
    Medium,
    /// System errors (execution bookkeeping, serialization)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - caller errors
            ErrorCode::JobNotFound
            | ErrorCode::JobAlreadyRunning
            | ErrorCode::JobDefinitionInvalid
            | ErrorCode::SchedulerAlreadyStarted => Self::Low,

            // Medium severity - operational
            ErrorCode::JobTimeout | ErrorCode::SchedulerStopped => Self::Medium,

            // High severity - system errors
            ErrorCode::JobExecutionFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            // Critical severity
            ErrorCode::InternalError | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job id, group, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Bursar Core.
///
/// This error type supports:
/// - Structured error codes for the management surface
/// - Error chaining with context
/// - User-friendly vs internal messages
/// - HTTP status code mapping
/// - Metrics integration
#[derive(Error, Debug)]
pub struct BursarError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to operators)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for BursarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl BursarError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a job not found error.
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(
            ErrorCode::JobNotFound,
            format!("Job not found: {}", job_id),
        )
        .with_details(ErrorDetails::new().with_entity("job", &job_id))
    }

    /// Create a conflict error for a job that is already mid-flight.
    pub fn job_already_running(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(
            ErrorCode::JobAlreadyRunning,
            format!("Job is already running: {}", job_id),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("job", &job_id)
                .with_retry_after(5),
        )
    }

    /// Create a definition error for a job rejected at registration time.
    pub fn invalid_definition(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(
            ErrorCode::JobDefinitionInvalid,
            format!("Invalid job definition '{}': {}", job_id, reason.into()),
        )
        .with_details(ErrorDetails::new().with_entity("job", &job_id))
    }

    /// Create an error for a management call made after shutdown.
    pub fn scheduler_stopped() -> Self {
        Self::new(
            ErrorCode::SchedulerStopped,
            "The scheduler loop has been shut down",
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "bursar_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Management Surface Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for management surface callers.
///
/// The transport layer (out of scope here) serializes this verbatim.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for management surface responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&BursarError> for ErrorResponse {
    fn from(error: &BursarError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty()
                    && error.details.entity_id.is_none()
                    && error.details.retry_after_secs.is_none()
                {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| BursarError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| BursarError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| BursarError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| BursarError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for BursarError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for BursarError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::JobTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::task::JoinError> for BursarError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::with_internal(
            ErrorCode::JobExecutionFailed,
            "Job execution task did not complete",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for BursarError {
    fn from(error: anyhow::Error) -> Self {
        // Try to downcast to BursarError first
        match error.downcast::<BursarError>() {
            Ok(bursar_error) => bursar_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for BursarError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration error occurred",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::JobAlreadyRunning.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::JobDefinitionInvalid.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::JobTimeout.http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::JobAlreadyRunning.is_retryable());
        assert!(!ErrorCode::JobNotFound.is_retryable());
        assert!(!ErrorCode::JobTimeout.is_retryable());
    }

    #[test]
    fn test_error_creation() {
        let error = BursarError::job_not_found("reward-recompute");
        assert_eq!(error.code(), ErrorCode::JobNotFound);
        assert_eq!(error.http_status(), StatusCode::NOT_FOUND);
        assert!(!error.is_retryable());
        assert_eq!(
            error.details().entity_id.as_deref(),
            Some("reward-recompute")
        );
    }

    #[test]
    fn test_conflict_carries_retry_hint() {
        let error = BursarError::job_already_running("cache-cleanup");
        assert_eq!(error.code(), ErrorCode::JobAlreadyRunning);
        assert_eq!(error.details().retry_after_secs, Some(5));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_context() {
        let error = BursarError::invalid_definition("bad-job", "timeout must be positive")
            .with_context("field", "timeout");

        assert!(error.details().context.contains_key("field"));
        assert_eq!(error.code(), ErrorCode::JobDefinitionInvalid);
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::JobNotFound),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::JobTimeout),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::JobExecutionFailed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let error = BursarError::job_not_found("vacuum");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("JOB_NOT_FOUND"));
        assert!(json.contains("vacuum"));
    }

    #[test]
    fn test_error_display() {
        let error = BursarError::with_internal(
            ErrorCode::JobExecutionFailed,
            "Job execution failed",
            "handler task aborted",
        );

        let display = format!("{}", error);
        assert!(display.contains("JobExecutionFailed"));
        assert!(display.contains("Job execution failed"));
        assert!(display.contains("handler task aborted"));
    }

    #[test]
    fn test_option_context() {
        let value: Option<u32> = None;
        let result = value.context("job missing");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(ErrorCode::JobNotFound.category(), "job");
        assert_eq!(ErrorCode::SchedulerStopped.category(), "scheduler");
        assert_eq!(ErrorCode::ConfigurationError.category(), "configuration");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }
}
