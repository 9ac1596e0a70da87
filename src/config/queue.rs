use anyhow::Result;
use std::env;

/// Table names the relational store reads and writes. Config-owned
/// identifiers; they must match the deployed schema.
#[derive(Debug, Clone)]
pub struct QueueTables {
    pub jobs: String,
    pub failed: String,
    pub logs: String,
}

impl Default for QueueTables {
    fn default() -> Self {
        Self {
            jobs: "jobs".to_string(),
            failed: "failed_jobs".to_string(),
            logs: "job_logs".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// When false, dispatch runs jobs inline instead of writing rows.
    pub enabled: bool,
    /// `memory` or `pgsql` (`mysql`/`sqlite` are accepted names but have no
    /// shipped backend).
    pub driver: String,
    /// Default per-attempt timeout in seconds for jobs that set none.
    pub job_timeout: i64,
    pub tables: QueueTables,
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env::var("QUEUE_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            driver: env::var("QUEUE_DRIVER").unwrap_or_else(|_| "memory".to_string()),
            job_timeout: env::var("QUEUE_JOB_TIMEOUT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            tables: QueueTables {
                jobs: env::var("QUEUE_TABLE_JOBS").unwrap_or_else(|_| "jobs".to_string()),
                failed: env::var("QUEUE_TABLE_FAILED").unwrap_or_else(|_| "failed_jobs".to_string()),
                logs: env::var("QUEUE_TABLE_LOGS").unwrap_or_else(|_| "job_logs".to_string()),
            },
        })
    }

    /// Enabled manager backed by the in-memory store. Test helper.
    pub fn enabled_memory() -> Self {
        Self {
            enabled: true,
            driver: "memory".to_string(),
            job_timeout: 300,
            tables: QueueTables::default(),
        }
    }

    /// Disabled manager: dispatch falls back to inline execution.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            driver: "memory".to_string(),
            job_timeout: 300,
            tables: QueueTables::default(),
        }
    }
}
