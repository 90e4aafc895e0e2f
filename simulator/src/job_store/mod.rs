//! Dual-layer job store.
//!
//! A volatile [`LiveJobs`] mirror holds in-flight jobs; a [`DurableJobStore`]
//! holds every job row and its conversation records across restarts.
//!
//! Reconciliation rule:
//! - writes go to the durable store first and are mirrored only on success,
//!   so the live entry never runs ahead of persisted state
//! - reads prefer the live entry while present, else reconstruct from the
//!   durable row plus its conversation records
//! - summaries always come from the durable store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{ConversationRecord, JobStatus, JobSummary, SimulationJob};

pub mod live;
pub mod sqlite;

pub use live::LiveJobs;
pub use sqlite::SqliteJobStore;

/// Error recorded on rows swept by [`JobStore::recover_interrupted`].
pub const INTERRUPTED_ERROR: &str = "interrupted by process restart";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is {status}, not processing")]
    NotProcessing { job_id: String, status: JobStatus },

    #[error("Conversation '{conversation_id}' already recorded for job {job_id}")]
    DuplicateRecord {
        job_id: String,
        conversation_id: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// A job about to be written with status `pending`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub total: u32,
    pub started_at: DateTime<Utc>,
}

/// Terminal fields written by [`JobStore::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub passed: u32,
    pub failed: u32,
    pub error: Option<String>,
}

/// Durable collaborator: keyed insert/update/select, no multi-statement
/// transactions.
#[async_trait]
pub trait DurableJobStore: Send + Sync {
    async fn insert_job(&self, job: &NewJob) -> Result<(), StoreError>;

    /// Guarded status update; fails unless the row is currently `from`.
    async fn transition(&self, job_id: &str, from: JobStatus, to: JobStatus)
        -> Result<(), StoreError>;

    /// Append-only insert of one record, then bump the row's counters.
    async fn append_record(
        &self,
        job_id: &str,
        record: &ConversationRecord,
    ) -> Result<(), StoreError>;

    /// Write terminal fields of a `processing` row; `progress` becomes `total`.
    async fn finalize(
        &self,
        job_id: &str,
        outcome: &JobOutcome,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn load_job(&self, job_id: &str) -> Result<Option<SimulationJob>, StoreError>;

    /// All job rows, most recent first.
    async fn list_summaries(&self) -> Result<Vec<JobSummary>, StoreError>;

    /// Fail every non-terminal row. Returns the number of rows touched.
    async fn sweep_interrupted(&self, error: &str, ended_at: DateTime<Utc>)
        -> Result<u64, StoreError>;
}

// ============================================================================
// Composed Store
// ============================================================================

#[derive(Clone)]
pub struct JobStore {
    live: LiveJobs,
    durable: Arc<dyn DurableJobStore>,
}

impl JobStore {
    pub fn new(durable: Arc<dyn DurableJobStore>) -> Self {
        Self {
            live: LiveJobs::new(),
            durable,
        }
    }

    pub fn live(&self) -> &LiveJobs {
        &self.live
    }

    /// Write the durable row (status `pending`) and register the live mirror.
    pub async fn create(&self, job: NewJob) -> Result<SimulationJob, StoreError> {
        self.durable.insert_job(&job).await?;

        let view = SimulationJob {
            id: job.id,
            status: JobStatus::Pending,
            progress: 0,
            total: job.total,
            passed: 0,
            failed: 0,
            started_at: job.started_at,
            ended_at: None,
            error: None,
            results: Vec::new(),
        };
        self.live.register(view.clone());
        tracing::info!(job_id = %view.id, total = view.total, "Simulation job created");
        Ok(view)
    }

    pub async fn mark_processing(&self, job_id: &str) -> Result<(), StoreError> {
        self.durable
            .transition(job_id, JobStatus::Pending, JobStatus::Processing)
            .await?;
        self.live.transition(job_id, JobStatus::Processing)?;
        tracing::debug!(job_id, status = %JobStatus::Processing, "Job status changed");
        Ok(())
    }

    pub async fn append_conversation_record(
        &self,
        job_id: &str,
        record: ConversationRecord,
    ) -> Result<(), StoreError> {
        self.durable.append_record(job_id, &record).await?;
        self.live.record(job_id, record)
    }

    pub async fn finalize(&self, job_id: &str, outcome: JobOutcome) -> Result<(), StoreError> {
        if !outcome.status.is_terminal() {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.to_string(),
                from: JobStatus::Processing,
                to: outcome.status,
            });
        }
        let ended_at = Utc::now();
        self.durable.finalize(job_id, &outcome, ended_at).await?;
        if self.live.contains(job_id) {
            self.live.finish(job_id, &outcome, ended_at)?;
        }
        tracing::info!(
            job_id,
            status = %outcome.status,
            passed = outcome.passed,
            failed = outcome.failed,
            error = outcome.error.as_deref().unwrap_or(""),
            "Simulation job finalized"
        );
        Ok(())
    }

    /// Drop the live mirror; the durable row is the source of truth after this.
    pub fn evict(&self, job_id: &str) -> Option<SimulationJob> {
        self.live.evict(job_id)
    }

    pub fn read_live(&self, job_id: &str) -> Option<SimulationJob> {
        self.live.read(job_id)
    }

    pub async fn read_durable(&self, job_id: &str) -> Result<Option<SimulationJob>, StoreError> {
        self.durable.load_job(job_id).await
    }

    /// Live entry while present, else reconstructed from durable storage.
    pub async fn get(&self, job_id: &str) -> Result<Option<SimulationJob>, StoreError> {
        if let Some(job) = self.read_live(job_id) {
            return Ok(Some(job));
        }
        self.read_durable(job_id).await
    }

    pub async fn list_summaries(&self) -> Result<Vec<JobSummary>, StoreError> {
        self.durable.list_summaries().await
    }

    /// Fail durable rows left non-terminal by a previous process.
    ///
    /// Rows that are live in this process are never touched, so call this at
    /// startup before any job is created.
    pub async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        if !self.live.is_empty() {
            return Ok(0);
        }
        let swept = self
            .durable
            .sweep_interrupted(INTERRUPTED_ERROR, Utc::now())
            .await?;
        if swept > 0 {
            tracing::warn!(swept, "Marked interrupted simulation jobs as failed");
        }
        Ok(swept)
    }
}
