//! Built-in domain job managers and their jobs.
//!
//! A domain job manager groups related job definitions and registers them
//! into the engine at startup. Managers own handler logic but never
//! scheduling: cadence, retries, and timeouts live on the definitions they
//! hand over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use super::job::{Frequency, JobContext, JobDefinition, JobHandler, JobOutcome};

/// A domain grouping of related job definitions.
///
/// Registered through `JobEngine::register_manager`, which stamps every
/// definition with the manager's group.
pub trait JobManager: Send + Sync {
    /// The group key all of this manager's jobs belong to.
    fn group(&self) -> &str;

    /// The definitions to register.
    fn definitions(&self) -> Vec<JobDefinition>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Maintenance Jobs
// ═══════════════════════════════════════════════════════════════════════════════

/// System maintenance jobs: cache eviction, session pruning, record
/// archiving.
pub struct MaintenanceJobs {
    cache: Arc<DashMap<String, DateTime<Utc>>>,
    sessions: Arc<DashMap<String, DateTime<Utc>>>,
    records: Arc<DashMap<String, DateTime<Utc>>>,
    archived: Arc<DashMap<String, DateTime<Utc>>>,
}

impl MaintenanceJobs {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
            records: Arc::new(DashMap::new()),
            archived: Arc::new(DashMap::new()),
        }
    }

    /// Cache entries by key, with their expiry instant.
    pub fn cache(&self) -> Arc<DashMap<String, DateTime<Utc>>> {
        Arc::clone(&self.cache)
    }

    /// Sessions by id, with their last-activity instant.
    pub fn sessions(&self) -> Arc<DashMap<String, DateTime<Utc>>> {
        Arc::clone(&self.sessions)
    }

    /// Closed records awaiting archival, by id.
    pub fn records(&self) -> Arc<DashMap<String, DateTime<Utc>>> {
        Arc::clone(&self.records)
    }

    /// Archived records, by id.
    pub fn archived(&self) -> Arc<DashMap<String, DateTime<Utc>>> {
        Arc::clone(&self.archived)
    }
}

impl Default for MaintenanceJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager for MaintenanceJobs {
    fn group(&self) -> &str {
        "maintenance"
    }

    fn definitions(&self) -> Vec<JobDefinition> {
        vec![
            JobDefinition::new(
                "cache-eviction",
                "Cache eviction",
                Arc::new(CacheEvictionJob {
                    cache: Arc::clone(&self.cache),
                }),
            )
            .with_description("Evict expired entries from the in-process cache")
            .with_frequency(Frequency::Hourly)
            .with_priority(5)
            .with_timeout(Duration::from_secs(60))
            .with_retry_count(2)
            .with_retry_delay(Duration::from_secs(10)),
            JobDefinition::new(
                "session-prune",
                "Session pruning",
                Arc::new(SessionPruneJob {
                    sessions: Arc::clone(&self.sessions),
                    max_idle: Duration::from_secs(24 * 60 * 60),
                }),
            )
            .with_description("Remove sessions idle past the retention window")
            .with_frequency(Frequency::Hourly)
            .with_priority(5)
            .with_timeout(Duration::from_secs(60))
            .with_retry_count(2)
            .with_retry_delay(Duration::from_secs(10)),
            JobDefinition::new(
                "record-archive",
                "Record archiving",
                Arc::new(ArchiveRecordsJob {
                    records: Arc::clone(&self.records),
                    archived: Arc::clone(&self.archived),
                    retention: Duration::from_secs(90 * 24 * 60 * 60),
                }),
            )
            .with_description("Move long-closed records to the archive")
            .with_frequency(Frequency::Weekly)
            .with_priority(1)
            .with_timeout(Duration::from_secs(600))
            .with_retry_count(1)
            .with_retry_delay(Duration::from_secs(60)),
        ]
    }
}

/// Job: evict expired cache entries.
struct CacheEvictionJob {
    cache: Arc<DashMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl JobHandler for CacheEvictionJob {
    async fn execute(&self, ctx: &JobContext) -> JobOutcome {
        let now = Utc::now();
        let before = self.cache.len();
        self.cache.retain(|_, expires_at| *expires_at > now);
        let evicted = before - self.cache.len();

        ctx.log_info(&format!("Evicted {} expired cache entries", evicted));
        Ok(Some(serde_json::json!({ "evicted": evicted })))
    }
}

/// Job: prune idle sessions.
struct SessionPruneJob {
    sessions: Arc<DashMap<String, DateTime<Utc>>>,
    max_idle: Duration,
}

#[async_trait]
impl JobHandler for SessionPruneJob {
    async fn execute(&self, ctx: &JobContext) -> JobOutcome {
        let cutoff = chrono::Duration::from_std(self.max_idle)
            .ok()
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.sessions.len();
        self.sessions.retain(|_, last_seen| *last_seen > cutoff);
        let pruned = before - self.sessions.len();

        ctx.log_info(&format!("Pruned {} idle sessions", pruned));
        Ok(Some(serde_json::json!({ "pruned": pruned })))
    }
}

/// Job: archive records closed longer ago than the retention window.
struct ArchiveRecordsJob {
    records: Arc<DashMap<String, DateTime<Utc>>>,
    archived: Arc<DashMap<String, DateTime<Utc>>>,
    retention: Duration,
}

#[async_trait]
impl JobHandler for ArchiveRecordsJob {
    async fn execute(&self, ctx: &JobContext) -> JobOutcome {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|entry| *entry.value() <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            if let Some((id, closed_at)) = self.records.remove(id) {
                self.archived.insert(id, closed_at);
            }
        }

        ctx.log_info(&format!("Archived {} records", stale.len()));
        Ok(Some(serde_json::json!({ "archived": stale.len() })))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Analytics Jobs
// ═══════════════════════════════════════════════════════════════════════════════

/// Analytics jobs: reward-point recomputation and performance-metric
/// aggregation.
pub struct AnalyticsJobs {
    activity: Arc<DashMap<String, i64>>,
    rewards: Arc<DashMap<String, i64>>,
    samples: Arc<RwLock<Vec<u64>>>,
}

impl AnalyticsJobs {
    pub fn new() -> Self {
        Self {
            activity: Arc::new(DashMap::new()),
            rewards: Arc::new(DashMap::new()),
            samples: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Activity counters by account id.
    pub fn activity(&self) -> Arc<DashMap<String, i64>> {
        Arc::clone(&self.activity)
    }

    /// Recomputed reward points by account id.
    pub fn rewards(&self) -> Arc<DashMap<String, i64>> {
        Arc::clone(&self.rewards)
    }

    /// Raw latency samples awaiting aggregation, in milliseconds.
    pub fn samples(&self) -> Arc<RwLock<Vec<u64>>> {
        Arc::clone(&self.samples)
    }
}

impl Default for AnalyticsJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager for AnalyticsJobs {
    fn group(&self) -> &str {
        "analytics"
    }

    fn definitions(&self) -> Vec<JobDefinition> {
        vec![
            JobDefinition::new(
                "reward-recompute",
                "Reward recomputation",
                Arc::new(RewardRecomputeJob {
                    activity: Arc::clone(&self.activity),
                    rewards: Arc::clone(&self.rewards),
                }),
            )
            .with_description("Recompute reward points from recorded activity")
            .with_frequency(Frequency::Daily)
            .with_priority(10)
            .with_timeout(Duration::from_secs(300))
            .with_retry_count(3)
            .with_retry_delay(Duration::from_secs(30)),
            JobDefinition::new(
                "metrics-aggregate",
                "Metric aggregation",
                Arc::new(MetricsAggregateJob {
                    samples: Arc::clone(&self.samples),
                }),
            )
            .with_description("Aggregate performance samples into summary figures")
            .with_frequency(Frequency::Hourly)
            .with_priority(0)
            .with_timeout(Duration::from_secs(120)),
        ]
    }
}

/// Job: recompute reward points from activity counters.
struct RewardRecomputeJob {
    activity: Arc<DashMap<String, i64>>,
    rewards: Arc<DashMap<String, i64>>,
}

// Points per recorded activity unit.
const POINTS_PER_ACTIVITY: i64 = 10;

#[async_trait]
impl JobHandler for RewardRecomputeJob {
    async fn execute(&self, ctx: &JobContext) -> JobOutcome {
        let mut accounts = 0usize;
        for entry in self.activity.iter() {
            self.rewards
                .insert(entry.key().clone(), entry.value() * POINTS_PER_ACTIVITY);
            accounts += 1;
        }

        ctx.log_info(&format!("Recomputed rewards for {} accounts", accounts));
        Ok(Some(serde_json::json!({ "accounts": accounts })))
    }
}

/// Job: fold raw latency samples into summary figures.
struct MetricsAggregateJob {
    samples: Arc<RwLock<Vec<u64>>>,
}

#[async_trait]
impl JobHandler for MetricsAggregateJob {
    async fn execute(&self, ctx: &JobContext) -> JobOutcome {
        let samples = std::mem::take(&mut *self.samples.write());
        if samples.is_empty() {
            ctx.log_info("No samples to aggregate");
            return Ok(Some(serde_json::json!({ "count": 0 })));
        }

        let count = samples.len();
        let max = samples.iter().copied().max().unwrap_or(0);
        let avg = samples.iter().sum::<u64>() / count as u64;

        ctx.log_info(&format!(
            "Aggregated {} samples (avg {}ms, max {}ms)",
            count, avg, max
        ));
        Ok(Some(serde_json::json!({
            "count": count,
            "avg_ms": avg,
            "max_ms": max,
        })))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::Trigger;
    use uuid::Uuid;

    fn ctx(job_id: &str) -> JobContext {
        JobContext::new(job_id, Uuid::new_v4(), 1, Trigger::Manual)
    }

    #[test]
    fn test_manager_definitions_are_valid() {
        for def in MaintenanceJobs::new()
            .definitions()
            .into_iter()
            .chain(AnalyticsJobs::new().definitions())
        {
            assert!(def.validate().is_ok(), "invalid definition: {}", def.id);
        }
    }

    #[test]
    fn test_manager_groups() {
        assert_eq!(MaintenanceJobs::new().group(), "maintenance");
        assert_eq!(AnalyticsJobs::new().group(), "analytics");
        assert_eq!(MaintenanceJobs::new().definitions().len(), 3);
        assert_eq!(AnalyticsJobs::new().definitions().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_eviction_removes_expired() {
        let manager = MaintenanceJobs::new();
        let cache = manager.cache();
        cache.insert("stale".to_string(), Utc::now() - chrono::Duration::hours(1));
        cache.insert("fresh".to_string(), Utc::now() + chrono::Duration::hours(1));

        let job = CacheEvictionJob {
            cache: manager.cache(),
        };
        let output = job.execute(&ctx("cache-eviction")).await.unwrap().unwrap();

        assert_eq!(output["evicted"], 1);
        assert!(cache.contains_key("fresh"));
        assert!(!cache.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_session_prune_keeps_active() {
        let manager = MaintenanceJobs::new();
        let sessions = manager.sessions();
        sessions.insert("idle".to_string(), Utc::now() - chrono::Duration::days(3));
        sessions.insert("active".to_string(), Utc::now());

        let job = SessionPruneJob {
            sessions: manager.sessions(),
            max_idle: Duration::from_secs(24 * 60 * 60),
        };
        let output = job.execute(&ctx("session-prune")).await.unwrap().unwrap();

        assert_eq!(output["pruned"], 1);
        assert!(sessions.contains_key("active"));
    }

    #[tokio::test]
    async fn test_record_archive_moves_old_records() {
        let manager = MaintenanceJobs::new();
        manager
            .records()
            .insert("old".to_string(), Utc::now() - chrono::Duration::days(120));
        manager
            .records()
            .insert("recent".to_string(), Utc::now() - chrono::Duration::days(5));

        let job = ArchiveRecordsJob {
            records: manager.records(),
            archived: manager.archived(),
            retention: Duration::from_secs(90 * 24 * 60 * 60),
        };
        let output = job.execute(&ctx("record-archive")).await.unwrap().unwrap();

        assert_eq!(output["archived"], 1);
        assert!(manager.archived().contains_key("old"));
        assert!(manager.records().contains_key("recent"));
    }

    #[tokio::test]
    async fn test_reward_recompute() {
        let manager = AnalyticsJobs::new();
        manager.activity().insert("acct-1".to_string(), 7);
        manager.activity().insert("acct-2".to_string(), 3);

        let job = RewardRecomputeJob {
            activity: manager.activity(),
            rewards: manager.rewards(),
        };
        let output = job.execute(&ctx("reward-recompute")).await.unwrap().unwrap();

        assert_eq!(output["accounts"], 2);
        assert_eq!(*manager.rewards().get("acct-1").unwrap(), 70);
        assert_eq!(*manager.rewards().get("acct-2").unwrap(), 30);
    }

    #[tokio::test]
    async fn test_metrics_aggregate_drains_samples() {
        let manager = AnalyticsJobs::new();
        manager.samples().write().extend([10, 20, 60]);

        let job = MetricsAggregateJob {
            samples: manager.samples(),
        };
        let output = job.execute(&ctx("metrics-aggregate")).await.unwrap().unwrap();

        assert_eq!(output["count"], 3);
        assert_eq!(output["avg_ms"], 30);
        assert_eq!(output["max_ms"], 60);
        assert!(manager.samples().read().is_empty());
    }
}
