use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::app::jobs::{JobRecord, JobStatus, RetryAttempt};

use super::{ExecutionMetrics, FailedJobRecord, JobLogRecord, JobStore, QueueStats, StoreResult};

/// In-memory backend for development and tests. Claims serialize through a
/// single write lock, which is what makes them exclusive across concurrent
/// workers in one process.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    failed: RwLock<Vec<FailedJobRecord>>,
    logs: RwLock<Vec<JobLogRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every log row, newest last. Test helper.
    pub async fn logs(&self) -> Vec<JobLogRecord> {
        self.logs.read().await.clone()
    }

    /// Snapshot of one job row. Test helper.
    pub async fn get_job(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    fn revive(failed: &FailedJobRecord, now: DateTime<Utc>) -> JobRecord {
        let mut record = JobRecord::new(
            failed.task.clone(),
            failed.payload.clone(),
            failed.queue.clone(),
            failed.priority,
        );
        record.tags = failed.tags.clone();
        record.available_at = now;
        record.created_at = now;
        record.updated_at = now;
        record
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, record: &JobRecord) -> StoreResult<String> {
        self.jobs.write().await.insert(record.id.clone(), record.clone());
        Ok(record.id.clone())
    }

    async fn release_delayed(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut jobs = self.jobs.write().await;
        let mut released = 0;
        for record in jobs.values_mut() {
            if record.status == JobStatus::Delayed && record.available_at <= now {
                record.status = JobStatus::Pending;
                record.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn claim_next(&self, queue: Option<&str>, now: DateTime<Utc>) -> StoreResult<Option<JobRecord>> {
        let mut jobs = self.jobs.write().await;
        let candidate = jobs
            .values()
            .filter(|r| r.is_runnable(now))
            .filter(|r| queue.map(|q| r.queue == q).unwrap_or(true))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|r| r.id.clone());

        if let Some(record) = candidate.and_then(|id| jobs.get_mut(&id)) {
            record.status = JobStatus::Processing;
            record.attempts += 1;
            record.updated_at = now;
            return Ok(Some(record.clone()));
        }
        Ok(None)
    }

    async fn mark_completed(&self, id: &str, _metrics: &ExecutionMetrics) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            record.status = JobStatus::Completed;
            record.last_error = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reschedule_for_retry(&self, id: &str, available_at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            record.retry_history.push(RetryAttempt {
                attempt: record.attempts,
                error: error.to_string(),
                at: now,
            });
            record.last_error = Some(error.to_string());
            record.available_at = available_at;
            record.status = if available_at <= now {
                JobStatus::Pending
            } else {
                JobStatus::Delayed
            };
            record.updated_at = now;
        }
        Ok(())
    }

    async fn move_to_failed(&self, id: &str, failed: &FailedJobRecord) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(record) = jobs.get_mut(id) {
            record.status = JobStatus::Failed;
            record.last_error = Some(failed.exception.clone());
            record.updated_at = Utc::now();
        }
        drop(jobs);
        self.failed.write().await.push(failed.clone());
        Ok(())
    }

    async fn release_stuck(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut jobs = self.jobs.write().await;
        let mut released = 0;
        for record in jobs.values_mut() {
            let deadline = record.updated_at + Duration::seconds(record.timeout);
            if record.status == JobStatus::Processing && deadline < now {
                record.status = JobStatus::Pending;
                record.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self, queue: Option<&str>) -> StoreResult<QueueStats> {
        let jobs = self.jobs.read().await;
        let failed = self.failed.read().await;

        let mut stats = QueueStats::default();
        let mut active_attempts: u64 = 0;
        let mut active_rows: u64 = 0;

        for record in jobs.values() {
            if queue.map(|q| record.queue != q).unwrap_or(false) {
                continue;
            }
            match record.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Delayed => stats.delayed += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            if matches!(
                record.status,
                JobStatus::Pending | JobStatus::Delayed | JobStatus::Processing
            ) {
                active_rows += 1;
                active_attempts += u64::from(record.attempts);
            }
            if record.priority <= 3 {
                stats.high_priority += 1;
            }
        }

        stats.dead_lettered = failed
            .iter()
            .filter(|f| queue.map(|q| f.queue == q).unwrap_or(true))
            .count() as u64;
        stats.avg_attempts = if active_rows > 0 {
            active_attempts as f64 / active_rows as f64
        } else {
            0.0
        };

        Ok(stats)
    }

    async fn list_failed(&self, limit: i64, offset: i64) -> StoreResult<Vec<FailedJobRecord>> {
        let failed = self.failed.read().await;
        let mut rows: Vec<FailedJobRecord> = failed.clone();
        rows.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_failed(&self, id: &str) -> StoreResult<Option<FailedJobRecord>> {
        Ok(self.failed.read().await.iter().find(|f| f.id == id).cloned())
    }

    async fn retry_failed(&self, id: &str) -> StoreResult<bool> {
        let mut failed = self.failed.write().await;
        let Some(pos) = failed.iter().position(|f| f.id == id) else {
            return Ok(false);
        };
        let record = failed.remove(pos);
        drop(failed);

        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        // Prefer resetting the original row so its tuning survives; fall
        // back to a fresh row when the original was purged.
        if let Some(original) = jobs.get_mut(&record.original_job_id) {
            original.status = JobStatus::Pending;
            original.attempts = 0;
            original.last_error = None;
            original.retry_history.clear();
            original.available_at = now;
            original.updated_at = now;
        } else {
            let revived = Self::revive(&record, now);
            jobs.insert(revived.id.clone(), revived);
        }
        Ok(true)
    }

    async fn retry_all_failed(&self, queue: Option<&str>) -> StoreResult<usize> {
        let ids: Vec<String> = {
            let failed = self.failed.read().await;
            failed
                .iter()
                .filter(|f| queue.map(|q| f.queue == q).unwrap_or(true))
                .map(|f| f.id.clone())
                .collect()
        };
        let mut retried = 0;
        for id in ids {
            if self.retry_failed(&id).await? {
                retried += 1;
            }
        }
        Ok(retried)
    }

    async fn purge_older_than(&self, days: i64, now: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = now - Duration::days(days);
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, r| {
            !(matches!(r.status, JobStatus::Completed | JobStatus::Failed) && r.updated_at < cutoff)
        });
        Ok(before - jobs.len())
    }

    async fn purge_failed(&self, queue: Option<&str>) -> StoreResult<usize> {
        let mut failed = self.failed.write().await;
        let before = failed.len();
        failed.retain(|f| queue.map(|q| f.queue != q).unwrap_or(false));
        Ok(before - failed.len())
    }

    async fn append_log(&self, log: &JobLogRecord) -> StoreResult<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
