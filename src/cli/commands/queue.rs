use anyhow::Result;
use std::sync::Arc;

use crate::app::events::dispatcher::{self, EventDispatcher};
use crate::app::jobs::event_job::{EventJob, EVENT_JOB_NAME};
use crate::app::jobs::queue_manager::QueueManager;
use crate::app::jobs::store::make_store;
use crate::app::jobs::worker::{run_pool, Worker, WorkerConfig};
use crate::app::jobs::JobRegistry;
use crate::config::Config;

/// Config → store → manager, with the built-in job types registered and
/// the configured dispatcher installed as the process-wide handle so
/// drained event jobs have something to re-publish through.
async fn bootstrap() -> Result<Arc<QueueManager>> {
    let config = Config::load()?;
    let store = make_store(&config)?;

    let registry = Arc::new(JobRegistry::new());
    registry.register_serde::<EventJob>(EVENT_JOB_NAME);

    let manager = Arc::new(QueueManager::new(store, registry, &config.queue));

    if dispatcher::global().is_none() {
        dispatcher::set_global(Arc::new(EventDispatcher::from_config(
            &config.events,
            Some(manager.clone()),
        )));
    }

    Ok(manager)
}

pub async fn handle_work(
    queue: Option<String>,
    batch: Option<u64>,
    max_seconds: u64,
    once: bool,
    workers: usize,
) -> Result<()> {
    let manager = bootstrap().await?;

    if once {
        match manager.process(queue.as_deref()).await? {
            Some(outcome) => println!("Processed one job: {:?}", outcome),
            None => println!("Nothing to process"),
        }
        return Ok(());
    }

    if let Some(size) = batch {
        let report = manager.process_batch(size, queue.as_deref(), max_seconds).await?;
        println!(
            "Batch done: {} processed, {} succeeded, {} failed in {:.1}s",
            report.processed,
            report.successful,
            report.failed,
            report.execution_time.as_secs_f64()
        );
        return Ok(());
    }

    let pool: Vec<Arc<Worker>> = (0..workers.max(1))
        .map(|_| {
            Arc::new(Worker::new(
                manager.clone(),
                WorkerConfig {
                    queue: queue.clone(),
                    ..Default::default()
                },
            ))
        })
        .collect();
    println!(
        "Processing jobs from '{}' with {} worker(s) (Ctrl+C to stop)",
        queue.as_deref().unwrap_or("all queues"),
        pool.len()
    );

    let signal_pool = pool.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            for worker in &signal_pool {
                worker.stop();
            }
        }
    });

    let stats_pool = pool.clone();
    run_pool(pool).await?;

    let mut processed = 0;
    let mut succeeded = 0;
    let mut retried = 0;
    let mut dead_lettered = 0;
    for worker in &stats_pool {
        let stats = worker.stats().await;
        processed += stats.processed;
        succeeded += stats.succeeded;
        retried += stats.retried;
        dead_lettered += stats.dead_lettered;
    }
    println!(
        "Worker stopped: {} processed, {} succeeded, {} retried, {} dead-lettered",
        processed, succeeded, retried, dead_lettered
    );
    Ok(())
}

pub async fn handle_failed(limit: i64, offset: i64) -> Result<()> {
    let manager = bootstrap().await?;
    let failed = manager.store().list_failed(limit, offset).await?;

    if failed.is_empty() {
        println!("No failed jobs");
        return Ok(());
    }

    for job in failed {
        println!(
            "{}  {}  queue={}  attempts={}  failed_at={}  {}",
            job.id,
            job.task,
            job.queue,
            job.total_attempts,
            job.failed_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&job.exception, 80),
        );
    }
    Ok(())
}

pub async fn handle_retry(id: Option<String>, all: bool, queue: Option<String>) -> Result<()> {
    let manager = bootstrap().await?;

    if all {
        let retried = manager.retry_all_failed(queue.as_deref()).await?;
        println!("Requeued {} failed job(s)", retried);
        return Ok(());
    }

    match id {
        Some(id) => {
            if manager.retry_failed(&id).await? {
                println!("Requeued failed job {}", id);
                Ok(())
            } else {
                Err(anyhow::anyhow!("no failed job with id {}", id))
            }
        }
        None => Err(anyhow::anyhow!("pass a failed-job id or --all")),
    }
}

pub async fn handle_flush_failed(queue: Option<String>) -> Result<()> {
    let manager = bootstrap().await?;
    let purged = manager.purge_failed(queue.as_deref()).await?;
    println!("Deleted {} failed job(s)", purged);
    Ok(())
}

pub async fn handle_stats(queue: Option<String>) -> Result<()> {
    let manager = bootstrap().await?;
    let stats = manager.stats(queue.as_deref()).await?;

    println!("Queue statistics{}", queue.as_deref().map(|q| format!(" for '{}'", q)).unwrap_or_default());
    println!("  pending:       {}", stats.pending);
    println!("  delayed:       {}", stats.delayed);
    println!("  processing:    {}", stats.processing);
    println!("  completed:     {}", stats.completed);
    println!("  failed:        {}", stats.failed);
    println!("  dead-lettered: {}", stats.dead_lettered);
    println!("  avg attempts:  {:.2}", stats.avg_attempts);
    println!("  high priority: {}", stats.high_priority);
    Ok(())
}

pub async fn handle_maintain(purge_days: Option<i64>) -> Result<()> {
    let manager = bootstrap().await?;
    let report = manager.maintain(purge_days).await?;
    println!(
        "Maintenance done: {} delayed released, {} stuck released, {} purged",
        report.released_delayed, report.released_stuck, report.purged
    );
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}
