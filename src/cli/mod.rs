pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Queue administration CLI")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process jobs from the queue
    #[command(name = "queue:work")]
    QueueWork {
        /// Only drain this queue
        #[arg(long)]
        queue: Option<String>,
        /// Drain up to N jobs as one batch, then exit
        #[arg(long)]
        batch: Option<u64>,
        /// Wall-clock budget for a batch, in seconds
        #[arg(long, default_value = "60")]
        max_seconds: u64,
        /// Process a single job, then exit
        #[arg(long)]
        once: bool,
        /// Number of concurrent drain loops
        #[arg(long, default_value = "1")]
        workers: usize,
    },
    /// List dead-lettered jobs
    #[command(name = "queue:failed")]
    QueueFailed {
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Put a dead-lettered job (or all of them) back on the queue
    #[command(name = "queue:retry")]
    QueueRetry {
        /// Failed-job id
        id: Option<String>,
        /// Retry every failed job
        #[arg(long)]
        all: bool,
        /// With --all, only retry this queue
        #[arg(long)]
        queue: Option<String>,
    },
    /// Delete dead-lettered jobs
    #[command(name = "queue:flush-failed")]
    QueueFlushFailed {
        #[arg(long)]
        queue: Option<String>,
    },
    /// Show queue counters
    #[command(name = "queue:stats")]
    QueueStats {
        #[arg(long)]
        queue: Option<String>,
    },
    /// Promote due delayed jobs, recover stuck jobs, optionally purge old rows
    #[command(name = "queue:maintain")]
    QueueMaintain {
        /// Also purge completed/failed rows older than N days
        #[arg(long)]
        purge_days: Option<i64>,
    },
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::QueueWork {
            queue,
            batch,
            max_seconds,
            once,
            workers,
        } => commands::queue::handle_work(queue, batch, max_seconds, once, workers).await,
        Commands::QueueFailed { limit, offset } => commands::queue::handle_failed(limit, offset).await,
        Commands::QueueRetry { id, all, queue } => commands::queue::handle_retry(id, all, queue).await,
        Commands::QueueFlushFailed { queue } => commands::queue::handle_flush_failed(queue).await,
        Commands::QueueStats { queue } => commands::queue::handle_stats(queue).await,
        Commands::QueueMaintain { purge_days } => commands::queue::handle_maintain(purge_days).await,
    }
}
