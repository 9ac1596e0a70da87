use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Double, Integer, Jsonb, Nullable, Text, Timestamptz};

use crate::app::jobs::{BackoffStrategy, JobRecord, JobStatus};
use crate::config::queue::QueueTables;
use crate::database::{DbConnection, DbPool};

use super::{ExecutionMetrics, FailedJobRecord, JobLogRecord, JobStore, QueueStats, StoreResult};

/// PostgreSQL backend.
///
/// Everything is raw SQL so the three table names can come from
/// configuration; the names are config-owned identifiers, never user input.
/// Expected schema (migrations are managed outside this crate):
///
/// - jobs:        id varchar(26) pk, queue varchar, task varchar,
///                payload text, priority int, status varchar, attempts int,
///                max_attempts int, timeout_seconds bigint,
///                backoff_strategy varchar, retry_delay bigint, tags jsonb,
///                last_error text null, retry_history jsonb,
///                available_at timestamptz, created_at timestamptz,
///                updated_at timestamptz
/// - failed jobs: id varchar(26) pk, queue, task, payload text,
///                exception text, stack_trace text, failed_at timestamptz,
///                total_attempts int, retry_history jsonb,
///                original_job_id varchar(26), priority int, tags jsonb
/// - job logs:    id varchar(26) pk, job_id varchar(26), queue, task,
///                level varchar, message text, context jsonb,
///                execution_time_ms bigint null, memory_usage bigint null,
///                created_at timestamptz
pub struct DatabaseJobStore {
    pool: DbPool,
    tables: QueueTables,
}

#[derive(Debug, QueryableByName)]
struct JobRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    queue: String,
    #[diesel(sql_type = Text)]
    task: String,
    #[diesel(sql_type = Text)]
    payload: String,
    #[diesel(sql_type = Integer)]
    priority: i32,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Integer)]
    attempts: i32,
    #[diesel(sql_type = Integer)]
    max_attempts: i32,
    #[diesel(sql_type = BigInt)]
    timeout_seconds: i64,
    #[diesel(sql_type = Text)]
    backoff_strategy: String,
    #[diesel(sql_type = BigInt)]
    retry_delay: i64,
    #[diesel(sql_type = Jsonb)]
    tags: serde_json::Value,
    #[diesel(sql_type = Nullable<Text>)]
    last_error: Option<String>,
    #[diesel(sql_type = Jsonb)]
    retry_history: serde_json::Value,
    #[diesel(sql_type = Timestamptz)]
    available_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, QueryableByName)]
struct FailedRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    queue: String,
    #[diesel(sql_type = Text)]
    task: String,
    #[diesel(sql_type = Text)]
    payload: String,
    #[diesel(sql_type = Text)]
    exception: String,
    #[diesel(sql_type = Text)]
    stack_trace: String,
    #[diesel(sql_type = Timestamptz)]
    failed_at: DateTime<Utc>,
    #[diesel(sql_type = Integer)]
    total_attempts: i32,
    #[diesel(sql_type = Jsonb)]
    retry_history: serde_json::Value,
    #[diesel(sql_type = Text)]
    original_job_id: String,
    #[diesel(sql_type = Integer)]
    priority: i32,
    #[diesel(sql_type = Jsonb)]
    tags: serde_json::Value,
}

#[derive(Debug, QueryableByName)]
struct StatsRow {
    #[diesel(sql_type = BigInt)]
    pending: i64,
    #[diesel(sql_type = BigInt)]
    delayed: i64,
    #[diesel(sql_type = BigInt)]
    processing: i64,
    #[diesel(sql_type = BigInt)]
    completed: i64,
    #[diesel(sql_type = BigInt)]
    failed: i64,
    #[diesel(sql_type = Double)]
    avg_attempts: f64,
    #[diesel(sql_type = BigInt)]
    high_priority: i64,
}

#[derive(Debug, QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

impl DatabaseJobStore {
    pub fn new(pool: DbPool, tables: QueueTables) -> Self {
        Self { pool, tables }
    }

    fn conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    fn row_to_record(row: JobRow) -> StoreResult<JobRecord> {
        Ok(JobRecord {
            id: row.id,
            queue: row.queue,
            task: row.task,
            payload: row.payload,
            priority: row.priority,
            status: JobStatus::parse(&row.status),
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            timeout: row.timeout_seconds,
            backoff_strategy: BackoffStrategy::parse(&row.backoff_strategy),
            retry_delay: row.retry_delay,
            tags: serde_json::from_value(row.tags)?,
            last_error: row.last_error,
            retry_history: serde_json::from_value(row.retry_history)?,
            available_at: row.available_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn row_to_failed(row: FailedRow) -> StoreResult<FailedJobRecord> {
        Ok(FailedJobRecord {
            id: row.id,
            queue: row.queue,
            task: row.task,
            payload: row.payload,
            exception: row.exception,
            stack_trace: row.stack_trace,
            failed_at: row.failed_at,
            total_attempts: row.total_attempts.max(0) as u32,
            retry_history: serde_json::from_value(row.retry_history)?,
            original_job_id: row.original_job_id,
            priority: row.priority,
            tags: serde_json::from_value(row.tags)?,
        })
    }

    fn insert_job_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, queue, task, payload, priority, status, attempts, max_attempts, \
             timeout_seconds, backoff_strategy, retry_delay, tags, last_error, retry_history, \
             available_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            self.tables.jobs
        )
    }

    fn insert_record(&self, conn: &mut diesel::pg::PgConnection, record: &JobRecord) -> StoreResult<()> {
        sql_query(self.insert_job_sql())
            .bind::<Text, _>(&record.id)
            .bind::<Text, _>(&record.queue)
            .bind::<Text, _>(&record.task)
            .bind::<Text, _>(&record.payload)
            .bind::<Integer, _>(record.priority)
            .bind::<Text, _>(record.status.as_str())
            .bind::<Integer, _>(record.attempts as i32)
            .bind::<Integer, _>(record.max_attempts as i32)
            .bind::<BigInt, _>(record.timeout)
            .bind::<Text, _>(record.backoff_strategy.as_str())
            .bind::<BigInt, _>(record.retry_delay)
            .bind::<Jsonb, _>(serde_json::to_value(&record.tags)?)
            .bind::<Nullable<Text>, _>(&record.last_error)
            .bind::<Jsonb, _>(serde_json::to_value(&record.retry_history)?)
            .bind::<Timestamptz, _>(record.available_at)
            .bind::<Timestamptz, _>(record.created_at)
            .bind::<Timestamptz, _>(record.updated_at)
            .execute(conn)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for DatabaseJobStore {
    async fn insert_job(&self, record: &JobRecord) -> StoreResult<String> {
        let mut conn = self.conn()?;
        self.insert_record(&mut conn, record)?;
        Ok(record.id.clone())
    }

    async fn release_delayed(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let released = sql_query(format!(
            "UPDATE {} SET status = 'pending', updated_at = $1 \
             WHERE status = 'delayed' AND available_at <= $1",
            self.tables.jobs
        ))
        .bind::<Timestamptz, _>(now)
        .execute(&mut conn)?;
        Ok(released)
    }

    async fn claim_next(&self, queue: Option<&str>, now: DateTime<Utc>) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.conn()?;

        // Single-statement claim: the inner select locks the winning row
        // with SKIP LOCKED, so concurrent workers never claim the same id.
        let row: Option<JobRow> = match queue {
            Some(queue) => sql_query(format!(
                "UPDATE {jobs} \
                 SET status = 'processing', attempts = attempts + 1, updated_at = $1 \
                 WHERE id = ( \
                     SELECT id FROM {jobs} \
                     WHERE status = 'pending' AND available_at <= $1 AND queue = $2 \
                     ORDER BY priority ASC, created_at ASC \
                     FOR UPDATE SKIP LOCKED \
                     LIMIT 1 \
                 ) \
                 RETURNING *",
                jobs = self.tables.jobs
            ))
            .bind::<Timestamptz, _>(now)
            .bind::<Text, _>(queue)
            .get_result(&mut conn)
            .optional()?,
            None => sql_query(format!(
                "UPDATE {jobs} \
                 SET status = 'processing', attempts = attempts + 1, updated_at = $1 \
                 WHERE id = ( \
                     SELECT id FROM {jobs} \
                     WHERE status = 'pending' AND available_at <= $1 \
                     ORDER BY priority ASC, created_at ASC \
                     FOR UPDATE SKIP LOCKED \
                     LIMIT 1 \
                 ) \
                 RETURNING *",
                jobs = self.tables.jobs
            ))
            .bind::<Timestamptz, _>(now)
            .get_result(&mut conn)
            .optional()?,
        };

        let claimed = row.map(Self::row_to_record).transpose()?;
        if let Some(record) = &claimed {
            tracing::debug!(job_id = %record.id, queue = %record.queue, "job claimed");
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: &str, _metrics: &ExecutionMetrics) -> StoreResult<()> {
        let mut conn = self.conn()?;
        sql_query(format!(
            "UPDATE {} SET status = 'completed', last_error = NULL, updated_at = $2 WHERE id = $1",
            self.tables.jobs
        ))
        .bind::<Text, _>(id)
        .bind::<Timestamptz, _>(Utc::now())
        .execute(&mut conn)?;
        Ok(())
    }

    async fn reschedule_for_retry(&self, id: &str, available_at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        sql_query(format!(
            "UPDATE {} \
             SET retry_history = retry_history || jsonb_build_array( \
                     jsonb_build_object('attempt', attempts, 'error', $2::text, 'at', $3::timestamptz)), \
                 last_error = $2, \
                 available_at = $3, \
                 status = CASE WHEN $3 <= $4 THEN 'pending' ELSE 'delayed' END, \
                 updated_at = $4 \
             WHERE id = $1",
            self.tables.jobs
        ))
        .bind::<Text, _>(id)
        .bind::<Text, _>(error)
        .bind::<Timestamptz, _>(available_at)
        .bind::<Timestamptz, _>(Utc::now())
        .execute(&mut conn)?;
        Ok(())
    }

    async fn move_to_failed(&self, id: &str, failed: &FailedJobRecord) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let retry_history = serde_json::to_value(&failed.retry_history)?;
        let tags = serde_json::to_value(&failed.tags)?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            sql_query(format!(
                "UPDATE {} SET status = 'failed', last_error = $2, updated_at = $3 WHERE id = $1",
                self.tables.jobs
            ))
            .bind::<Text, _>(id)
            .bind::<Text, _>(&failed.exception)
            .bind::<Timestamptz, _>(Utc::now())
            .execute(conn)?;

            sql_query(format!(
                "INSERT INTO {} (id, queue, task, payload, exception, stack_trace, failed_at, \
                 total_attempts, retry_history, original_job_id, priority, tags) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                self.tables.failed
            ))
            .bind::<Text, _>(&failed.id)
            .bind::<Text, _>(&failed.queue)
            .bind::<Text, _>(&failed.task)
            .bind::<Text, _>(&failed.payload)
            .bind::<Text, _>(&failed.exception)
            .bind::<Text, _>(&failed.stack_trace)
            .bind::<Timestamptz, _>(failed.failed_at)
            .bind::<Integer, _>(failed.total_attempts as i32)
            .bind::<Jsonb, _>(&retry_history)
            .bind::<Text, _>(&failed.original_job_id)
            .bind::<Integer, _>(failed.priority)
            .bind::<Jsonb, _>(&tags)
            .execute(conn)?;

            Ok(())
        })?;
        Ok(())
    }

    async fn release_stuck(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let released = sql_query(format!(
            "UPDATE {} SET status = 'pending', updated_at = $1 \
             WHERE status = 'processing' \
               AND updated_at + timeout_seconds * interval '1 second' < $1",
            self.tables.jobs
        ))
        .bind::<Timestamptz, _>(now)
        .execute(&mut conn)?;
        Ok(released)
    }

    async fn stats(&self, queue: Option<&str>) -> StoreResult<QueueStats> {
        let mut conn = self.conn()?;
        let filter = if queue.is_some() { " WHERE queue = $1" } else { "" };

        let stats_sql = format!(
            "SELECT \
                 COUNT(*) FILTER (WHERE status = 'pending') AS pending, \
                 COUNT(*) FILTER (WHERE status = 'delayed') AS delayed, \
                 COUNT(*) FILTER (WHERE status = 'processing') AS processing, \
                 COUNT(*) FILTER (WHERE status = 'completed') AS completed, \
                 COUNT(*) FILTER (WHERE status = 'failed') AS failed, \
                 COALESCE(AVG(attempts) FILTER (WHERE status IN ('pending', 'delayed', 'processing')), 0)::float8 AS avg_attempts, \
                 COUNT(*) FILTER (WHERE priority <= 3) AS high_priority \
             FROM {}{}",
            self.tables.jobs, filter
        );
        let row: StatsRow = match queue {
            Some(queue) => sql_query(stats_sql).bind::<Text, _>(queue).get_result(&mut conn)?,
            None => sql_query(stats_sql).get_result(&mut conn)?,
        };

        let failed_sql = format!("SELECT COUNT(*) AS count FROM {}{}", self.tables.failed, filter);
        let failed_count: CountRow = match queue {
            Some(queue) => sql_query(failed_sql).bind::<Text, _>(queue).get_result(&mut conn)?,
            None => sql_query(failed_sql).get_result(&mut conn)?,
        };

        Ok(QueueStats {
            pending: row.pending.max(0) as u64,
            delayed: row.delayed.max(0) as u64,
            processing: row.processing.max(0) as u64,
            completed: row.completed.max(0) as u64,
            failed: row.failed.max(0) as u64,
            dead_lettered: failed_count.count.max(0) as u64,
            avg_attempts: row.avg_attempts,
            high_priority: row.high_priority.max(0) as u64,
        })
    }

    async fn list_failed(&self, limit: i64, offset: i64) -> StoreResult<Vec<FailedJobRecord>> {
        let mut conn = self.conn()?;
        let rows: Vec<FailedRow> = sql_query(format!(
            "SELECT * FROM {} ORDER BY failed_at DESC LIMIT $1 OFFSET $2",
            self.tables.failed
        ))
        .bind::<BigInt, _>(limit.max(0))
        .bind::<BigInt, _>(offset.max(0))
        .load(&mut conn)?;

        rows.into_iter().map(Self::row_to_failed).collect()
    }

    async fn get_failed(&self, id: &str) -> StoreResult<Option<FailedJobRecord>> {
        let mut conn = self.conn()?;
        let row: Option<FailedRow> = sql_query(format!("SELECT * FROM {} WHERE id = $1", self.tables.failed))
            .bind::<Text, _>(id)
            .get_result(&mut conn)
            .optional()?;
        row.map(Self::row_to_failed).transpose()
    }

    async fn retry_failed(&self, id: &str) -> StoreResult<bool> {
        let Some(failed) = self.get_failed(id).await? else {
            return Ok(false);
        };

        let mut conn = self.conn()?;
        let now = Utc::now();
        let revived = {
            let mut record = JobRecord::new(
                failed.task.clone(),
                failed.payload.clone(),
                failed.queue.clone(),
                failed.priority,
            );
            record.tags = failed.tags.clone();
            record
        };

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            // Reset the original row when it still exists so its tuning
            // survives; otherwise insert a fresh row from the failed record.
            let reset = sql_query(format!(
                "UPDATE {} SET status = 'pending', attempts = 0, last_error = NULL, \
                 retry_history = '[]'::jsonb, available_at = $2, updated_at = $2 WHERE id = $1",
                self.tables.jobs
            ))
            .bind::<Text, _>(&failed.original_job_id)
            .bind::<Timestamptz, _>(now)
            .execute(conn)?;

            if reset == 0 {
                self.insert_record(conn, &revived).map_err(|e| match e {
                    super::StoreError::Query(e) => e,
                    other => diesel::result::Error::QueryBuilderError(other.to_string().into()),
                })?;
            }

            sql_query(format!("DELETE FROM {} WHERE id = $1", self.tables.failed))
                .bind::<Text, _>(&failed.id)
                .execute(conn)?;

            Ok(())
        })?;
        tracing::info!(failed_id = %failed.id, task = %failed.task, "failed job requeued");
        Ok(true)
    }

    async fn retry_all_failed(&self, queue: Option<&str>) -> StoreResult<usize> {
        let ids: Vec<String> = {
            let mut conn = self.conn()?;
            let rows: Vec<FailedRow> = match queue {
                Some(queue) => sql_query(format!("SELECT * FROM {} WHERE queue = $1", self.tables.failed))
                    .bind::<Text, _>(queue)
                    .load(&mut conn)?,
                None => sql_query(format!("SELECT * FROM {}", self.tables.failed)).load(&mut conn)?,
            };
            rows.into_iter().map(|r| r.id).collect()
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
        let mut conn = self.conn()?;
        let cutoff = now - chrono::Duration::days(days);
        let purged = sql_query(format!(
            "DELETE FROM {} WHERE status IN ('completed', 'failed') AND updated_at < $1",
            self.tables.jobs
        ))
        .bind::<Timestamptz, _>(cutoff)
        .execute(&mut conn)?;
        Ok(purged)
    }

    async fn purge_failed(&self, queue: Option<&str>) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let purged = match queue {
            Some(queue) => sql_query(format!("DELETE FROM {} WHERE queue = $1", self.tables.failed))
                .bind::<Text, _>(queue)
                .execute(&mut conn)?,
            None => sql_query(format!("DELETE FROM {}", self.tables.failed)).execute(&mut conn)?,
        };
        Ok(purged)
    }

    async fn append_log(&self, log: &JobLogRecord) -> StoreResult<()> {
        let mut conn = self.conn()?;
        sql_query(format!(
            "INSERT INTO {} (id, job_id, queue, task, level, message, context, execution_time_ms, \
             memory_usage, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.tables.logs
        ))
        .bind::<Text, _>(&log.id)
        .bind::<Text, _>(&log.job_id)
        .bind::<Text, _>(&log.queue)
        .bind::<Text, _>(&log.task)
        .bind::<Text, _>(log.level.as_str())
        .bind::<Text, _>(&log.message)
        .bind::<Jsonb, _>(&log.context)
        .bind::<Nullable<BigInt>, _>(log.execution_time_ms.map(|ms| ms as i64))
        .bind::<Nullable<BigInt>, _>(log.memory_usage.map(|b| b as i64))
        .bind::<Timestamptz, _>(log.created_at)
        .execute(&mut conn)?;
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "pgsql"
    }
}
