use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use super::retry::RetryPolicy;
use super::store::{ExecutionMetrics, FailedJobRecord, JobLogRecord, JobStore, LogLevel, StoreResult};
use super::{JobRecord, JobRegistry};

/// What happened to a single claimed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// The attempt failed and the row was rescheduled with this delay.
    Retried { delay_secs: i64 },
    /// The attempt failed terminally; a dead-letter row was written.
    DeadLettered,
}

/// Runs one attempt of a claimed job row and maps every outcome to a row
/// transition. Handler errors never escape; only store faults surface to
/// the caller.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: Arc<JobRegistry>,
    retry_policy: RetryPolicy,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<JobRegistry>) -> Self {
        Self {
            store,
            registry,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// The row must already be claimed (`processing`, attempts counted).
    pub async fn execute(&self, record: JobRecord) -> StoreResult<ExecutionOutcome> {
        let job = match self.registry.create(&record.task, &record.payload) {
            Ok(job) => job,
            Err(e) => {
                // A class that cannot be resolved will not resolve on a
                // retry either; dead-letter immediately.
                tracing::error!(job_id = %record.id, task = %record.task, error = %e, "job class resolution failed");
                return self.dead_letter(&record, None, &e).await;
            }
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(record.timeout.max(1) as u64),
            job.handle(),
        )
        .await;
        let metrics = ExecutionMetrics {
            duration_ms: started.elapsed().as_millis() as u64,
            memory_bytes: current_rss(),
        };

        let error = match result {
            Ok(Ok(())) => {
                self.store.mark_completed(&record.id, &metrics).await?;
                let log = JobLogRecord::for_job(&record, LogLevel::Info, "job completed")
                    .with_context(json!({ "attempt": record.attempts }))
                    .with_metrics(&metrics);
                self.store.append_log(&log).await?;
                tracing::info!(job_id = %record.id, task = %record.task, duration_ms = metrics.duration_ms, "job completed");
                return Ok(ExecutionOutcome::Completed);
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("job timed out after {}s", record.timeout),
        };

        if record.can_retry() {
            let delay = self
                .retry_policy
                .delay(record.backoff_strategy, record.retry_delay, record.attempts);
            let available_at = Utc::now() + Duration::seconds(delay);
            self.store
                .reschedule_for_retry(&record.id, available_at, &error.to_string())
                .await?;
            let log = JobLogRecord::for_job(&record, LogLevel::Warning, "job failed, retry scheduled")
                .with_context(json!({
                    "attempt": record.attempts,
                    "max_attempts": record.max_attempts,
                    "retry_delay_secs": delay,
                    "error": error.to_string(),
                }))
                .with_metrics(&metrics);
            self.store.append_log(&log).await?;
            tracing::warn!(
                job_id = %record.id,
                task = %record.task,
                attempt = record.attempts,
                delay_secs = delay,
                error = %error,
                "job failed, retry scheduled"
            );
            Ok(ExecutionOutcome::Retried { delay_secs: delay })
        } else {
            let outcome = self.dead_letter(&record, Some(&metrics), &error).await?;
            job.failed(&error).await;
            Ok(outcome)
        }
    }

    async fn dead_letter(
        &self,
        record: &JobRecord,
        metrics: Option<&ExecutionMetrics>,
        error: &anyhow::Error,
    ) -> StoreResult<ExecutionOutcome> {
        let failed = FailedJobRecord {
            id: ulid::Ulid::new().to_string(),
            queue: record.queue.clone(),
            task: record.task.clone(),
            payload: record.payload.clone(),
            exception: error.to_string(),
            stack_trace: format!("{error:?}"),
            failed_at: Utc::now(),
            total_attempts: record.attempts,
            retry_history: record.retry_history.clone(),
            original_job_id: record.id.clone(),
            priority: record.priority,
            tags: record.tags.clone(),
        };
        self.store.move_to_failed(&record.id, &failed).await?;

        let mut log = JobLogRecord::for_job(record, LogLevel::Error, "job failed permanently").with_context(json!({
            "attempt": record.attempts,
            "max_attempts": record.max_attempts,
            "error": error.to_string(),
        }));
        if let Some(metrics) = metrics {
            log = log.with_metrics(metrics);
        }
        self.store.append_log(&log).await?;

        tracing::error!(
            job_id = %record.id,
            task = %record.task,
            attempts = record.attempts,
            error = %error,
            "job failed permanently"
        );
        Ok(ExecutionOutcome::DeadLettered)
    }
}

/// Best-effort resident set size, for the execution log.
fn current_rss() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
