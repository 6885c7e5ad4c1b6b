//! Background job engine for Bursar Core.
//!
//! This module provides the process-wide job scheduling and execution
//! engine:
//!
//! - **Job Definitions**: Trait-based opaque handlers with schedule,
//!   priority, timeout, and retry policy
//! - **Registry**: In-memory catalog of definitions, with group queries
//! - **Scheduler**: A single periodic tick that dispatches due, enabled
//!   jobs in priority order
//! - **Executor**: Per-id mutual exclusion, timeout watchdog, bounded
//!   retries
//! - **Tracker**: Running set and bounded run history
//! - **Engine**: The management facade (list, detail, force-run,
//!   enable/disable, group runs, shutdown)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Background Job Engine                          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌────────────────┐  │
//! │  │ Registry │──▶│ Scheduler │──▶│ Executor  │──▶│ Status Tracker │  │
//! │  │ (defs)   │   │ (tick)    │   │ (run/retry│   │ (running set + │  │
//! │  │          │   │           │   │  /timeout)│   │  history)      │  │
//! │  └──────────┘   └───────────┘   └───────────┘   └────────────────┘  │
//! │        ▲                                                ▲            │
//! │        │              ┌───────────────────┐             │            │
//! │        └──────────────│     JobEngine     │─────────────┘            │
//! │                       │ (management API)  │                          │
//! │                       └───────────────────┘                          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use bursar_core::config::Config;
//! use bursar_core::jobs::{JobEngine, MaintenanceJobs, AnalyticsJobs};
//!
//! let engine = JobEngine::new(&Config::load()?);
//! engine.register_manager(&MaintenanceJobs::new())?;
//! engine.register_manager(&AnalyticsJobs::new())?;
//! engine.start()?;
//!
//! // Operator surface
//! let result = engine.run_job("cache-eviction").await?;
//! engine.shutdown();
//! ```

pub mod admin;
pub mod engine;
pub mod executor;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use engine::{
    ClearedLocks, DefinitionView, JobDetails, JobEngine, JobSummary, RunningJobView,
};
pub use executor::{ExecutionOutcome, JobExecutor};
pub use job::{
    Frequency, HandlerError, JobContext, JobDefinition, JobHandler, JobOutcome, JobRunResult,
    RunStatus, Trigger,
};
pub use registry::JobRegistry;
pub use scheduler::{SchedulerHandle, SchedulerLoop};
pub use tracker::{RunningJob, StatusTracker};

// Built-in domain job managers
mod builtin;
pub use builtin::{AnalyticsJobs, JobManager, MaintenanceJobs};
