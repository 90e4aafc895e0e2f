use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{ConversationRecord, JobStatus, JobSummary, SimulationJob, TurnResult};
use sqlx::SqlitePool;

use super::{DurableJobStore, JobOutcome, NewJob, StoreError};

/// SQLite-backed durable job table.
///
/// Schema (created on [`SqliteJobStore::migrate`]):
/// ```sql
/// CREATE TABLE IF NOT EXISTS simulation_jobs (
///     id         TEXT    PRIMARY KEY,
///     status     TEXT    NOT NULL,
///     total      INTEGER NOT NULL,
///     progress   INTEGER NOT NULL DEFAULT 0,
///     passed     INTEGER NOT NULL DEFAULT 0,
///     failed     INTEGER NOT NULL DEFAULT 0,
///     started_at TEXT    NOT NULL,
///     ended_at   TEXT,
///     error      TEXT
/// );
/// CREATE TABLE IF NOT EXISTS simulation_conversations (
///     seq               INTEGER PRIMARY KEY AUTOINCREMENT,
///     job_id            TEXT    NOT NULL REFERENCES simulation_jobs(id),
///     conversation_id   TEXT    NOT NULL,
///     overall_passed    INTEGER NOT NULL,
///     execution_time_ms INTEGER NOT NULL,
///     error             TEXT,
///     turns             TEXT    NOT NULL,  -- JSON array of TurnResult
///     recorded_at       TEXT    NOT NULL,
///     UNIQUE (job_id, conversation_id)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    status: String,
    total: u32,
    progress: u32,
    passed: u32,
    failed: u32,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl JobRow {
    fn into_summary(self) -> Result<JobSummary, StoreError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(JobSummary {
            id: self.id,
            status,
            total: self.total,
            progress: self.progress,
            passed: self.passed,
            failed: self.failed,
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error,
        })
    }
}

const JOB_COLUMNS: &str =
    "id, status, total, progress, passed, failed, started_at, ended_at, error";

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the job tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS simulation_jobs (
                id         TEXT    PRIMARY KEY,
                status     TEXT    NOT NULL,
                total      INTEGER NOT NULL,
                progress   INTEGER NOT NULL DEFAULT 0,
                passed     INTEGER NOT NULL DEFAULT 0,
                failed     INTEGER NOT NULL DEFAULT 0,
                started_at TEXT    NOT NULL,
                ended_at   TEXT,
                error      TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS simulation_jobs_started ON simulation_jobs (started_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS simulation_conversations (
                seq               INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id            TEXT    NOT NULL REFERENCES simulation_jobs(id),
                conversation_id   TEXT    NOT NULL,
                overall_passed    INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                error             TEXT,
                turns             TEXT    NOT NULL,
                recorded_at       TEXT    NOT NULL,
                UNIQUE (job_id, conversation_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_job_row(&self, job_id: &str) -> Result<Option<JobRow>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM simulation_jobs WHERE id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn fetch_records(&self, job_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let rows: Vec<(String, bool, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT conversation_id, overall_passed, execution_time_ms, error, turns
             FROM simulation_conversations
             WHERE job_id = ?
             ORDER BY seq ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(conversation_id, overall_passed, execution_time_ms, error, turns_json)|
                 -> Result<ConversationRecord, StoreError> {
                    let turns: Vec<TurnResult> = serde_json::from_str(&turns_json)?;
                    Ok(ConversationRecord {
                        conversation_id,
                        turns,
                        overall_passed,
                        execution_time_ms: u64::try_from(execution_time_ms).unwrap_or_default(),
                        error,
                    })
                },
            )
            .collect()
    }

    /// Explain why a guarded record append touched no row.
    async fn not_processing(&self, job_id: &str) -> StoreError {
        match self.fetch_job_row(job_id).await {
            Ok(Some(row)) => match row.status.parse::<JobStatus>() {
                Ok(status) => StoreError::NotProcessing {
                    job_id: job_id.to_string(),
                    status,
                },
                Err(e) => StoreError::Serialization(e.to_string()),
            },
            Ok(None) => StoreError::JobNotFound(job_id.to_string()),
            Err(e) => e,
        }
    }

    /// Explain why a guarded status update touched no row.
    async fn transition_miss(&self, job_id: &str, to: JobStatus) -> StoreError {
        match self.fetch_job_row(job_id).await {
            Ok(Some(row)) => match row.status.parse::<JobStatus>() {
                Ok(from) => StoreError::IllegalTransition {
                    job_id: job_id.to_string(),
                    from,
                    to,
                },
                Err(e) => StoreError::Serialization(e.to_string()),
            },
            Ok(None) => StoreError::JobNotFound(job_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl DurableJobStore for SqliteJobStore {
    async fn insert_job(&self, job: &NewJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO simulation_jobs (id, status, total, progress, passed, failed, started_at)
             VALUES (?, ?, ?, 0, 0, 0, ?)",
        )
        .bind(&job.id)
        .bind(JobStatus::Pending.as_str())
        .bind(job.total)
        .bind(job.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.to_string(),
                from,
                to,
            });
        }
        let rows = sqlx::query("UPDATE simulation_jobs SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(job_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(self.transition_miss(job_id, to).await);
        }
        Ok(())
    }

    async fn append_record(
        &self,
        job_id: &str,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        let turns_json = serde_json::to_string(&record.turns)?;
        let execution_time_ms = i64::try_from(record.execution_time_ms).unwrap_or(i64::MAX);

        // Only a processing job accepts records.
        let inserted = sqlx::query(
            "INSERT INTO simulation_conversations
                (job_id, conversation_id, overall_passed, execution_time_ms, error, turns, recorded_at)
             SELECT ?, ?, ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM simulation_jobs WHERE id = ? AND status = ?)",
        )
        .bind(job_id)
        .bind(&record.conversation_id)
        .bind(record.overall_passed)
        .bind(execution_time_ms)
        .bind(&record.error)
        .bind(&turns_json)
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StoreError::DuplicateRecord {
                    job_id: job_id.to_string(),
                    conversation_id: record.conversation_id.clone(),
                }
            } else {
                StoreError::from(e)
            }
        })?
        .rows_affected();
        if inserted == 0 {
            return Err(self.not_processing(job_id).await);
        }

        let (passed, failed) = if record.overall_passed { (1, 0) } else { (0, 1) };
        let updated = sqlx::query(
            "UPDATE simulation_jobs
             SET progress = MIN(progress + 1, total),
                 passed   = passed + ?,
                 failed   = failed + ?
             WHERE id = ? AND status = ?",
        )
        .bind(passed)
        .bind(failed)
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(self.not_processing(job_id).await);
        }

        Ok(())
    }

    async fn finalize(
        &self,
        job_id: &str,
        outcome: &JobOutcome,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Completed only follows processing; failed may also abort a pending row.
        let sources: Vec<&str> = JobStatus::ALL
            .iter()
            .filter(|from| from.can_transition_to(outcome.status))
            .map(JobStatus::as_str)
            .collect();
        if sources.is_empty() {
            return Err(self.transition_miss(job_id, outcome.status).await);
        }
        let placeholders = vec!["?"; sources.len()].join(", ");
        let sql = format!(
            "UPDATE simulation_jobs
             SET status = ?, progress = total, passed = ?, failed = ?, ended_at = ?, error = ?
             WHERE id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(outcome.status.as_str())
            .bind(outcome.passed)
            .bind(outcome.failed)
            .bind(ended_at)
            .bind(&outcome.error)
            .bind(job_id);
        for from in sources {
            query = query.bind(from);
        }
        let rows = query.execute(&self.pool).await?.rows_affected();
        if rows == 0 {
            return Err(self.transition_miss(job_id, outcome.status).await);
        }
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<SimulationJob>, StoreError> {
        let Some(row) = self.fetch_job_row(job_id).await? else {
            return Ok(None);
        };
        let summary = row.into_summary()?;
        let results = self.fetch_records(job_id).await?;

        Ok(Some(SimulationJob {
            id: summary.id,
            status: summary.status,
            progress: summary.progress,
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            error: summary.error,
            results,
        }))
    }

    async fn list_summaries(&self) -> Result<Vec<JobSummary>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM simulation_jobs ORDER BY started_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_summary).collect()
    }

    async fn sweep_interrupted(
        &self,
        error: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            "UPDATE simulation_jobs
             SET status = ?, progress = total, ended_at = ?, error = ?
             WHERE status IN (?, ?)",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(ended_at)
        .bind(error)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
