use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::queue::QueueConfig;

use super::executor::{ExecutionOutcome, JobExecutor};
use super::store::{JobStore, QueueStats};
use super::{Job, JobRecord, JobRegistry};

/// Per-dispatch overrides. Unset fields fall back to the job's own tuning.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub queue: Option<String>,
    pub priority: Option<i32>,
    pub delay: Option<i64>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<i64>,
}

/// Result of a batch drain.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub execution_time: Duration,
}

/// Result of a maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub released_delayed: usize,
    pub released_stuck: usize,
    pub purged: usize,
}

/// Enqueue API plus the drain loops and administrative operations.
///
/// When disabled, `dispatch` does not write: the job runs synchronously on
/// the caller and its success is the dispatch result.
pub struct QueueManager {
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    executor: JobExecutor,
    enabled: bool,
    default_timeout: i64,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<JobRegistry>, config: &QueueConfig) -> Self {
        let executor = JobExecutor::new(store.clone(), registry.clone());
        Self {
            store,
            registry,
            executor,
            enabled: config.enabled,
            default_timeout: config.job_timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub async fn dispatch(&self, job: &dyn Job) -> Result<String> {
        self.dispatch_with(job, DispatchOptions::default()).await
    }

    /// Builds a job row from the job and the overrides and writes it. A
    /// positive delay parks the row as delayed until its availability time.
    pub async fn dispatch_with(&self, job: &dyn Job, options: DispatchOptions) -> Result<String> {
        if !self.enabled {
            job.handle().await?;
            tracing::debug!(job = %job.job_name(), "queue disabled, job ran inline");
            return Ok(String::new());
        }

        let payload = job.serialize()?;
        let queue = options.queue.unwrap_or_else(|| job.queue_name().to_string());
        let priority = options.priority.unwrap_or_else(|| job.priority());

        let mut record = JobRecord::new(job.job_name(), payload, queue, priority);
        record.max_attempts = options.max_attempts.unwrap_or_else(|| job.max_attempts()).max(1);
        record.timeout = options
            .timeout
            .or_else(|| job.timeout())
            .unwrap_or(self.default_timeout);
        record.backoff_strategy = job.backoff_strategy();
        record.retry_delay = job.retry_delay();
        record.tags = job.tags();
        let record = record.with_delay(options.delay.unwrap_or(0));

        let id = self.store.insert_job(&record).await?;
        tracing::info!(job_id = %id, task = %record.task, queue = %record.queue, "job dispatched");
        Ok(id)
    }

    /// One drain cycle: promote due delayed rows, claim the most urgent
    /// runnable row, execute it. `None` when nothing was claimable.
    pub async fn process(&self, queue: Option<&str>) -> Result<Option<ExecutionOutcome>> {
        let now = Utc::now();
        self.store.release_delayed(now).await?;

        let Some(record) = self.store.claim_next(queue, now).await? else {
            return Ok(None);
        };
        let outcome = self.executor.execute(record).await?;
        Ok(Some(outcome))
    }

    /// Drains up to `size` jobs, stopping early when the queue runs dry or
    /// the wall-clock budget is spent. The budget is only checked between
    /// jobs, never in the middle of a claimed one.
    pub async fn process_batch(&self, size: u64, queue: Option<&str>, max_seconds: u64) -> Result<BatchReport> {
        let started = Instant::now();
        let budget = Duration::from_secs(max_seconds);
        let mut report = BatchReport::default();

        for _ in 0..size {
            if started.elapsed() >= budget {
                break;
            }
            match self.process(queue).await? {
                None => break,
                Some(outcome) => {
                    report.processed += 1;
                    match outcome {
                        ExecutionOutcome::Completed => report.successful += 1,
                        ExecutionOutcome::Retried { .. } | ExecutionOutcome::DeadLettered => {
                            report.failed += 1
                        }
                    }
                }
            }
        }

        report.execution_time = started.elapsed();
        Ok(report)
    }

    pub async fn stats(&self, queue: Option<&str>) -> Result<QueueStats> {
        Ok(self.store.stats(queue).await?)
    }

    pub async fn purge_old(&self, days: i64) -> Result<usize> {
        Ok(self.store.purge_older_than(days, Utc::now()).await?)
    }

    pub async fn purge_failed(&self, queue: Option<&str>) -> Result<usize> {
        Ok(self.store.purge_failed(queue).await?)
    }

    pub async fn retry_failed(&self, id: &str) -> Result<bool> {
        Ok(self.store.retry_failed(id).await?)
    }

    pub async fn retry_all_failed(&self, queue: Option<&str>) -> Result<usize> {
        Ok(self.store.retry_all_failed(queue).await?)
    }

    pub async fn release_stuck(&self) -> Result<usize> {
        Ok(self.store.release_stuck(Utc::now()).await?)
    }

    /// Housekeeping pass: promote due delayed rows, recover stuck rows,
    /// optionally purge old terminal rows.
    pub async fn maintain(&self, purge_days: Option<i64>) -> Result<MaintenanceReport> {
        let now = Utc::now();
        let released_delayed = self.store.release_delayed(now).await?;
        let released_stuck = self.store.release_stuck(now).await?;
        let purged = match purge_days {
            Some(days) => self.store.purge_older_than(days, now).await?,
            None => 0,
        };
        Ok(MaintenanceReport {
            released_delayed,
            released_stuck,
            purged,
        })
    }
}
