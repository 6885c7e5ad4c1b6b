//! Operator/administrative surface.
//!
//! Process-level operations an administrator runs against a live engine:
//! status, stop-all, restart, clear-locks. The engine is in-process state,
//! so these only work against an injected engine handle; there is no
//! ambient global to reach for, and no out-of-process script can affect a
//! running engine except through the management surface.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

use super::builtin::JobManager;
use super::engine::{ClearedLocks, JobEngine, RunningJobView};

/// Snapshot of engine health for the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStatus {
    /// Registered job definitions
    pub registered: usize,
    /// Definitions with scheduling enabled
    pub enabled: usize,
    /// Whether the scheduler loop is ticking
    pub scheduler_active: bool,
    /// Currently executing runs
    pub running: Vec<RunningJobView>,
    /// Runs that have exceeded their job's timeout: operationally
    /// actionable, distinct from merely "running"
    pub stuck: Vec<RunningJobView>,
}

impl AdminStatus {
    /// Healthy means nothing is running past its expected timeout.
    pub fn is_healthy(&self) -> bool {
        self.stuck.is_empty()
    }
}

/// Dump running jobs and counts.
pub fn status(engine: &JobEngine) -> AdminStatus {
    AdminStatus {
        registered: engine.job_count(),
        enabled: engine.enabled_count(),
        scheduler_active: engine.scheduler_active(),
        running: engine.running_jobs(),
        stuck: engine.stuck_jobs(),
    }
}

/// Stop the scheduler loop, reporting runs still in flight.
///
/// In-flight runs are left to finish or hit their own timeout.
pub fn stop_all(engine: &JobEngine) -> Vec<RunningJobView> {
    engine.shutdown();
    let in_flight = engine.running_jobs();
    tracing::info!(in_flight = in_flight.len(), "Stop-all issued");
    in_flight
}

/// Stop the loop, re-register every manager's definitions, and start a
/// fresh loop. Returns the number of jobs registered.
pub fn restart(engine: &JobEngine, managers: &[&dyn JobManager]) -> Result<usize> {
    engine.shutdown();

    let mut registered = 0;
    for manager in managers {
        registered += engine.register_manager(*manager)?;
    }

    engine.start()?;
    tracing::info!(jobs = registered, "Engine restarted");
    Ok(registered)
}

/// Force-clear every running flag.
///
/// Escape hatch for wedged in-memory state. Entries older than the
/// staleness threshold (the engine's configured default when not given)
/// are swept into history as annotated terminal failures; younger entries
/// are only unflagged.
pub fn clear_locks(engine: &JobEngine, stale_after: Option<Duration>) -> ClearedLocks {
    engine.clear_locks(stale_after.unwrap_or_else(|| engine.lock_stale_after()))
}
