use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info};

use super::executor::ExecutionOutcome;
use super::queue_manager::QueueManager;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to drain; `None` drains every queue.
    pub queue: Option<String>,
    /// Sleep between polls when the queue is empty.
    pub sleep: Duration,
    /// Exit instead of sleeping when the queue runs dry.
    pub stop_when_empty: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: None,
            sleep: Duration::from_secs(1),
            stop_when_empty: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_job_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Long-running drain loop over a queue manager. One worker runs one loop;
/// run several workers (or several processes) for concurrency — claims stay
/// exclusive through the store.
pub struct Worker {
    manager: Arc<QueueManager>,
    config: WorkerConfig,
    running: AtomicBool,
    stats: RwLock<WorkerStats>,
}

impl Worker {
    pub fn new(manager: Arc<QueueManager>, config: WorkerConfig) -> Self {
        Self {
            manager,
            config,
            running: AtomicBool::new(false),
            stats: RwLock::new(WorkerStats::default()),
        }
    }

    /// Drains until `stop` is called (or the queue runs dry with
    /// `stop_when_empty`). Store faults are logged and retried after the
    /// poll sleep rather than killing the loop.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        {
            let mut stats = self.stats.write().await;
            *stats = WorkerStats {
                started_at: Some(chrono::Utc::now()),
                ..Default::default()
            };
        }
        let queue = self.config.queue.as_deref().unwrap_or("*");
        info!(queue = %queue, "queue worker started");

        while self.running.load(Ordering::SeqCst) {
            match self.manager.process(self.config.queue.as_deref()).await {
                Ok(Some(outcome)) => {
                    let mut stats = self.stats.write().await;
                    stats.processed += 1;
                    stats.last_job_at = Some(chrono::Utc::now());
                    match outcome {
                        ExecutionOutcome::Completed => stats.succeeded += 1,
                        ExecutionOutcome::Retried { .. } => stats.retried += 1,
                        ExecutionOutcome::DeadLettered => stats.dead_lettered += 1,
                    }
                }
                Ok(None) => {
                    if self.config.stop_when_empty {
                        break;
                    }
                    sleep(self.config.sleep).await;
                }
                Err(e) => {
                    error!(error = %e, "worker drain cycle failed");
                    sleep(self.config.sleep).await;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(queue = %queue, "queue worker stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }
}

/// Runs several drain loops concurrently and waits for all of them. Claim
/// exclusivity comes from the store, so the workers never collide.
pub async fn run_pool(workers: Vec<Arc<Worker>>) -> Result<()> {
    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| tokio::spawn(async move { worker.run().await }))
        .collect();

    for joined in futures::future::join_all(handles).await {
        joined??;
    }
    Ok(())
}
