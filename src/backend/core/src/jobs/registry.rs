//! The job registry: in-memory catalog of job definitions.
//!
//! The registry exclusively owns `JobDefinition`s. It has no behavior
//! beyond validated insert, lookup, and the enabled flag; scheduling and
//! execution state live elsewhere.

use dashmap::DashMap;

use crate::error::{BursarError, Result};
use crate::observability::metrics;
use crate::observability::EngineEvent;

use super::job::JobDefinition;

/// In-memory catalog of job definitions, keyed by id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobDefinition>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Insert or replace a definition by id.
    ///
    /// Definitions violating their invariants are rejected and never enter
    /// the registry.
    pub fn register(&self, def: JobDefinition) -> Result<()> {
        if let Err(reason) = def.validate() {
            return Err(BursarError::invalid_definition(def.id.clone(), reason));
        }

        EngineEvent::JobRegistered {
            job_id: def.id.clone(),
            group: def.group.clone(),
            frequency: def.frequency.to_string(),
        }
        .log();

        self.jobs.insert(def.id.clone(), def);
        metrics::set_jobs_registered(self.jobs.len() as u64);
        Ok(())
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Option<JobDefinition> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Check whether an id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// All registered definitions, in no particular order.
    pub fn all(&self) -> Vec<JobDefinition> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// All definitions belonging to a group.
    pub fn jobs_by_group(&self, group: &str) -> Vec<JobDefinition> {
        self.jobs
            .iter()
            .filter(|entry| entry.value().group == group)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Flip the enabled flag. Returns false if the id is unknown.
    ///
    /// Does not cancel an in-flight run; only future scheduling decisions
    /// are affected.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut entry) => {
                entry.value_mut().enabled = enabled;
                tracing::info!(job_id = %id, enabled, "Job enabled flag changed");
                true
            }
            None => false,
        }
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
