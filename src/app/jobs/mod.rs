pub mod event_job;
pub mod executor;
pub mod queue_manager;
pub mod retry;
pub mod store;
pub mod worker;

pub use event_job::EventJob;
pub use executor::{ExecutionOutcome, JobExecutor};
pub use queue_manager::{BatchReport, DispatchOptions, QueueManager};
pub use retry::RetryPolicy;
pub use store::{FailedJobRecord, JobLogRecord, JobStore, LogLevel, QueueStats};
pub use worker::{Worker, WorkerConfig};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Base trait all queued jobs implement. Tuning knobs default to sensible
/// values; jobs override what they need.
#[async_trait]
pub trait Job: Send + Sync + std::fmt::Debug {
    /// Identifier stored in the job row and used to look up the factory on
    /// the worker side.
    fn job_name(&self) -> &'static str;

    async fn handle(&self) -> Result<()>;

    fn max_attempts(&self) -> u32 {
        3
    }

    /// Base retry delay in seconds, shaped by the backoff strategy.
    fn retry_delay(&self) -> i64 {
        60
    }

    fn backoff_strategy(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential
    }

    fn queue_name(&self) -> &str {
        "default"
    }

    /// Queue priority, 0..=10. Lower numbers are claimed first.
    fn priority(&self) -> i32 {
        0
    }

    /// Per-attempt soft limit in seconds. `None` means "use the configured
    /// queue default".
    fn timeout(&self) -> Option<i64> {
        None
    }

    /// Advisory labels carried on the row.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Serialize job data for queue storage.
    fn serialize(&self) -> Result<String>;

    /// Called once when the job fails permanently.
    async fn failed(&self, error: &anyhow::Error) {
        tracing::error!(job = %self.job_name(), error = %error, "job failed permanently");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Delayed,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Delayed => "delayed",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "delayed" => JobStatus::Delayed,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "linear" => BackoffStrategy::Linear,
            "fixed" => BackoffStrategy::Fixed,
            _ => BackoffStrategy::Exponential,
        }
    }
}

/// One recorded failure on the way to a retry or the dead-letter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Persistent job row. Mutated only by the worker's execution cycle:
/// claim → complete / reschedule / dead-letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub task: String,
    pub payload: String,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout: i64,
    pub backoff_strategy: BackoffStrategy,
    pub retry_delay: i64,
    pub tags: Vec<String>,
    pub last_error: Option<String>,
    pub retry_history: Vec<RetryAttempt>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(task: impl Into<String>, payload: String, queue: impl Into<String>, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            queue: queue.into(),
            task: task.into(),
            payload,
            priority: priority.clamp(0, 10),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            timeout: 300,
            backoff_strategy: BackoffStrategy::Exponential,
            retry_delay: 60,
            tags: Vec::new(),
            last_error: None,
            retry_history: Vec::new(),
            available_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// A positive delay parks the row as `delayed` until `available_at`.
    pub fn with_delay(mut self, delay_secs: i64) -> Self {
        if delay_secs > 0 {
            self.status = JobStatus::Delayed;
            self.available_at = self.created_at + Duration::seconds(delay_secs);
        }
        self
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now
    }
}

/// Creates job instances from stored payloads.
pub trait JobFactory: Send + Sync {
    fn create_job(&self, payload: &str) -> Result<Box<dyn Job>>;
}

/// Factory for jobs that deserialize straight from their payload.
pub struct SerdeJobFactory<T: Job + DeserializeOwned + 'static> {
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Job + DeserializeOwned + 'static> SerdeJobFactory<T> {
    pub fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: Job + DeserializeOwned + 'static> Default for SerdeJobFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Job + DeserializeOwned + 'static> JobFactory for SerdeJobFactory<T> {
    fn create_job(&self, payload: &str) -> Result<Box<dyn Job>> {
        let job: T = serde_json::from_str(payload)?;
        Ok(Box::new(job))
    }
}

/// Name → factory registry consulted by the executor when a claimed row is
/// turned back into a job instance.
#[derive(Default)]
pub struct JobRegistry {
    factories: RwLock<HashMap<String, Box<dyn JobFactory>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_name: impl Into<String>, factory: impl JobFactory + 'static) {
        self.write().insert(job_name.into(), Box::new(factory));
    }

    pub fn register_serde<T: Job + DeserializeOwned + 'static>(&self, job_name: impl Into<String>) {
        self.register(job_name, SerdeJobFactory::<T>::new());
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn create(&self, job_name: &str, payload: &str) -> Result<Box<dyn Job>> {
        let factories = self.read();
        match factories.get(job_name) {
            Some(factory) => factory.create_job(payload),
            None => Err(anyhow::anyhow!("no factory registered for job type: {job_name}")),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Box<dyn JobFactory>>> {
        self.factories.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Box<dyn JobFactory>>> {
        self.factories.write().unwrap_or_else(|e| e.into_inner())
    }
}
