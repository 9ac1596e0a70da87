pub mod database;
pub mod memory;

pub use database::DatabaseJobStore;
pub use memory::MemoryJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::database::create_pool;

use super::{JobRecord, RetryAttempt};

/// Faults raised by a store backend. These are the only errors the queue
/// surfaces to its callers; handler failures never leave the execution
/// cycle as errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database pool unavailable: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("row encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("unsupported queue driver: {0}")]
    UnsupportedDriver(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Immutable dead-letter record written on terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub id: String,
    pub queue: String,
    pub task: String,
    pub payload: String,
    pub exception: String,
    pub stack_trace: String,
    pub failed_at: DateTime<Utc>,
    pub total_attempts: u32,
    pub retry_history: Vec<RetryAttempt>,
    pub original_job_id: String,
    pub priority: i32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// One execution-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogRecord {
    pub id: String,
    pub job_id: String,
    pub queue: String,
    pub task: String,
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
    pub execution_time_ms: Option<u64>,
    pub memory_usage: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl JobLogRecord {
    pub fn for_job(record: &JobRecord, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            job_id: record.id.clone(),
            queue: record.queue.clone(),
            task: record.task.clone(),
            level,
            message: message.into(),
            context: Value::Object(serde_json::Map::new()),
            execution_time_ms: None,
            memory_usage: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_metrics(mut self, metrics: &ExecutionMetrics) -> Self {
        self.execution_time_ms = Some(metrics.duration_ms);
        self.memory_usage = metrics.memory_bytes;
        self
    }
}

/// Measurements taken around a single attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    pub memory_bytes: Option<u64>,
}

/// Aggregate counters over job and failed-job rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub delayed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// Rows in the dead-letter store.
    pub dead_lettered: u64,
    /// Mean attempts across non-terminal rows.
    pub avg_attempts: f64,
    /// Job rows with priority <= 3.
    pub high_priority: u64,
}

/// Logical storage contract for job rows, failed-job rows, and execution
/// logs. Any backend satisfying it is conformant; coordination between
/// workers happens only here.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, record: &JobRecord) -> StoreResult<String>;

    /// Transitions delayed rows whose availability time has arrived back to
    /// pending. Idempotent for a fixed `now`.
    async fn release_delayed(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Atomically claims the next runnable row: lowest priority value first,
    /// oldest `created_at` among equals. The claim transitions
    /// pending → processing and increments `attempts`; no concurrent claim
    /// may return the same row.
    async fn claim_next(&self, queue: Option<&str>, now: DateTime<Utc>) -> StoreResult<Option<JobRecord>>;

    async fn mark_completed(&self, id: &str, metrics: &ExecutionMetrics) -> StoreResult<()>;

    /// Schedules a failed attempt for retry: records the error on the row's
    /// retry history, sets the availability time, and transitions to
    /// delayed (or pending when the delay already elapsed).
    async fn reschedule_for_retry(&self, id: &str, available_at: DateTime<Utc>, error: &str) -> StoreResult<()>;

    async fn move_to_failed(&self, id: &str, failed: &FailedJobRecord) -> StoreResult<()>;

    /// Recovers processing rows whose worker is gone: any row stuck past
    /// its timeout goes back to pending with its attempt count preserved.
    async fn release_stuck(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    async fn stats(&self, queue: Option<&str>) -> StoreResult<QueueStats>;

    async fn list_failed(&self, limit: i64, offset: i64) -> StoreResult<Vec<FailedJobRecord>>;

    async fn get_failed(&self, id: &str) -> StoreResult<Option<FailedJobRecord>>;

    /// Puts a dead-lettered job back on the queue with a reset attempt
    /// count. Returns false when the id is unknown.
    async fn retry_failed(&self, id: &str) -> StoreResult<bool>;

    async fn retry_all_failed(&self, queue: Option<&str>) -> StoreResult<usize>;

    /// Deletes completed and failed job rows older than the threshold.
    async fn purge_older_than(&self, days: i64, now: DateTime<Utc>) -> StoreResult<usize>;

    async fn purge_failed(&self, queue: Option<&str>) -> StoreResult<usize>;

    async fn append_log(&self, log: &JobLogRecord) -> StoreResult<()>;

    fn store_name(&self) -> &'static str;
}

/// Builds the store the configuration asks for. Only the in-memory and
/// PostgreSQL backends ship; other relational drivers are accepted by the
/// config surface but reported as unsupported here.
pub fn make_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    match config.queue.driver.as_str() {
        "memory" => Ok(Arc::new(MemoryJobStore::new())),
        "pgsql" => {
            let pool = create_pool(&config.database)?;
            Ok(Arc::new(DatabaseJobStore::new(pool, config.queue.tables.clone())))
        }
        other => Err(StoreError::UnsupportedDriver(other.to_string()).into()),
    }
}
