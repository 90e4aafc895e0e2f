//! Volatile per-process mirror of in-flight jobs.
//!
//! Only the orchestrator that created a job mutates its entry. Guards are
//! never held across an await.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared_types::{ConversationRecord, JobStatus, SimulationJob};

use super::{JobOutcome, StoreError};

#[derive(Debug, Clone, Default)]
pub struct LiveJobs {
    jobs: Arc<DashMap<String, SimulationJob>>,
}

impl LiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: SimulationJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    /// Snapshot of the live entry, if the job is still mirrored.
    pub fn read(&self, job_id: &str) -> Option<SimulationJob> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn transition(&self, job_id: &str, to: JobStatus) -> Result<(), StoreError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if !entry.status.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.to_string(),
                from: entry.status,
                to,
            });
        }
        entry.status = to;
        Ok(())
    }

    /// Mirror one settled conversation. Progress never passes `total`.
    pub fn record(&self, job_id: &str, record: ConversationRecord) -> Result<(), StoreError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if entry.status != JobStatus::Processing {
            return Err(StoreError::NotProcessing {
                job_id: job_id.to_string(),
                status: entry.status,
            });
        }
        entry.progress = (entry.progress + 1).min(entry.total);
        if record.overall_passed {
            entry.passed += 1;
        } else {
            entry.failed += 1;
        }
        entry.results.push(record);
        Ok(())
    }

    pub fn finish(
        &self,
        job_id: &str,
        outcome: &JobOutcome,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, outcome.status)?;
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.progress = entry.total;
            entry.passed = outcome.passed;
            entry.failed = outcome.failed;
            entry.ended_at = Some(ended_at);
            entry.error = outcome.error.clone();
        }
        Ok(())
    }

    /// Move a job to `failed` when its durable row can no longer be written.
    ///
    /// Follows the state machine: a job that already ended keeps its outcome.
    pub fn fail(
        &self,
        job_id: &str,
        error: impl Into<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Failed)?;
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.progress = entry.total;
            entry.ended_at = Some(ended_at);
            entry.error = Some(error.into());
        }
        Ok(())
    }

    pub fn evict(&self, job_id: &str) -> Option<SimulationJob> {
        self.jobs.remove(job_id).map(|(_, job)| job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: u32) -> SimulationJob {
        SimulationJob {
            id: "job-1".to_string(),
            status: JobStatus::Pending,
            progress: 0,
            total,
            passed: 0,
            failed: 0,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            results: Vec::new(),
        }
    }

    #[test]
    fn test_progress_is_capped_at_total() {
        let live = LiveJobs::new();
        live.register(job(1));
        live.transition("job-1", JobStatus::Processing).unwrap();

        live.record("job-1", ConversationRecord::from_turns("a", vec![], 1))
            .unwrap();
        live.record("job-1", ConversationRecord::task_failed("b", "boom"))
            .unwrap();

        let snapshot = live.read("job-1").unwrap();
        assert_eq!(snapshot.progress, 1);
        assert_eq!(snapshot.passed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.results.len(), 2);
    }

    #[test]
    fn test_rejects_illegal_transitions() {
        let live = LiveJobs::new();
        live.register(job(1));

        let err = live.transition("job-1", JobStatus::Completed).unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        live.transition("job-1", JobStatus::Processing).unwrap();
        live.transition("job-1", JobStatus::Failed).unwrap();
        assert!(live.transition("job-1", JobStatus::Completed).is_err());
        assert_eq!(live.read("job-1").unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_records_only_land_while_processing() {
        let live = LiveJobs::new();
        live.register(job(2));

        let err = live
            .record("job-1", ConversationRecord::from_turns("a", vec![], 1))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotProcessing {
                status: JobStatus::Pending,
                ..
            }
        ));

        live.transition("job-1", JobStatus::Processing).unwrap();
        live.fail("job-1", "store outage", Utc::now()).unwrap();
        assert!(live
            .record("job-1", ConversationRecord::from_turns("a", vec![], 1))
            .is_err());
        assert_eq!(live.read("job-1").unwrap().progress, 2);
    }

    #[test]
    fn test_fail_follows_the_state_machine() {
        let live = LiveJobs::new();
        live.register(job(3));

        live.fail("job-1", "aborted before dispatch", Utc::now())
            .unwrap();
        let snapshot = live.read("job-1").unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.progress, 3);
        assert_eq!(snapshot.error.as_deref(), Some("aborted before dispatch"));

        let err = live.fail("job-1", "again", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition {
                from: JobStatus::Failed,
                ..
            }
        ));
        assert_eq!(
            live.read("job-1").unwrap().error.as_deref(),
            Some("aborted before dispatch")
        );
    }

    #[test]
    fn test_unknown_job() {
        let live = LiveJobs::new();
        assert!(live.read("missing").is_none());
        assert!(matches!(
            live.transition("missing", JobStatus::Processing),
            Err(StoreError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_evict_removes_entry() {
        let live = LiveJobs::new();
        live.register(job(2));
        assert!(live.contains("job-1"));
        assert_eq!(live.evict("job-1").unwrap().total, 2);
        assert!(live.is_empty());
    }
}
