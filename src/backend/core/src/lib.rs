#![allow(clippy::result_large_err)]
//! # Bursar Core
//!
//! Background job scheduling and execution engine for the Bursar
//! administration platform.
//!
//! ## Architecture
//!
//! - **Jobs**: Registry, scheduler loop, executor, and status tracker
//!   behind a single `JobEngine` management facade
//! - **Observability**: Structured logging and metrics recording
//! - **Config**: Environment- and file-driven engine configuration
//!
//! The engine holds three guarantees under concurrent triggers, partial
//! failure, and operational control:
//!
//! 1. At most one concurrent attempt sequence per job id
//! 2. A handler failure, hang, or panic never kills the scheduler loop
//! 3. Shutdown drains: in-flight runs finish or hit their own timeout
//!
//! The engine instance is constructed once at process start and passed by
//! handle to every component that needs it; there is no ambient global.

pub mod config;
pub mod error;
pub mod jobs;
pub mod observability;

pub use error::{BursarError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{
        BursarError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result,
    };
    pub use crate::jobs::{
        AnalyticsJobs, ExecutionOutcome, Frequency, HandlerError, JobContext, JobDefinition,
        JobDetails, JobEngine, JobHandler, JobManager, JobOutcome, JobRunResult, JobSummary,
        MaintenanceJobs, RunStatus, RunningJobView, Trigger,
    };
}
