//! Shared fixtures for simulator integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{AgentLocator, ConversationRecord, JobStatus, JobSummary, SimulationJob};

use simulator::db;
use simulator::executor::{
    AgentClient, AgentReply, TurnExecutionError, TurnExecutor, TurnOutcome, TurnRequest,
};
use simulator::job_store::{
    DurableJobStore, JobOutcome, JobStore, NewJob, SqliteJobStore, StoreError,
};
use simulator::limiter::ConcurrencyLimiter;
use simulator::orchestrator::SimulationOrchestrator;

/// Utterances containing this marker fail remotely.
pub const FAIL_MARKER: &str = "FAIL";
/// Utterances containing this marker panic inside the agent call.
pub const PANIC_MARKER: &str = "PANIC";

pub fn test_agent() -> AgentLocator {
    AgentLocator {
        project_id: "test-project".to_string(),
        location: "global".to_string(),
        agent_id: "test-agent".to_string(),
        language_code: "en".to_string(),
    }
}

// ============================================================================
// Scripted Agent
// ============================================================================

/// Echoing agent that records what it saw and how many calls overlapped.
#[derive(Default)]
pub struct ScriptedAgent {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    sessions: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedAgent {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Utterances per session, in the order they arrived.
    pub fn sessions(&self) -> HashMap<String, Vec<String>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn detect_intent(&self, request: &TurnRequest) -> TurnOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .entry(request.session_id.clone())
            .or_default()
            .push(request.text.clone());

        if request.text.contains(PANIC_MARKER) {
            panic!("scripted agent panic on '{}'", request.text);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.text.contains(FAIL_MARKER) {
            return Err(TurnExecutionError::Remote(format!(
                "scripted failure for '{}'",
                request.text
            )));
        }

        Ok(AgentReply {
            text: format!("echo: {}", request.text),
            intent: Some("echo".to_string()),
            confidence: 0.9,
            page: Some("Start Page".to_string()),
        })
    }
}

// ============================================================================
// Flaky Durable Store
// ============================================================================

/// SQLite store whose writes can be switched off to simulate an outage.
pub struct FlakyStore {
    inner: SqliteJobStore,
    fail_appends: AtomicBool,
    fail_transitions: AtomicBool,
    finalize_failures: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteJobStore) -> Self {
        Self {
            inner,
            fail_appends: AtomicBool::new(false),
            fail_transitions: AtomicBool::new(false),
            finalize_failures: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_transitions(&self, fail: bool) {
        self.fail_transitions.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` finalize calls.
    pub fn fail_next_finalizes(&self, count: usize) {
        self.finalize_failures.store(count, Ordering::SeqCst);
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    fn outage() -> StoreError {
        StoreError::Database("disk I/O error".to_string())
    }
}

#[async_trait]
impl DurableJobStore for FlakyStore {
    async fn insert_job(&self, job: &NewJob) -> Result<(), StoreError> {
        self.inner.insert_job(job).await
    }

    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.transition(job_id, from, to).await
    }

    async fn append_record(
        &self,
        job_id: &str,
        record: &ConversationRecord,
    ) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.append_record(job_id, record).await
    }

    async fn finalize(
        &self,
        job_id: &str,
        outcome: &JobOutcome,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .finalize_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Self::outage());
        }
        self.inner.finalize(job_id, outcome, ended_at).await
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<SimulationJob>, StoreError> {
        self.inner.load_job(job_id).await
    }

    async fn list_summaries(&self) -> Result<Vec<JobSummary>, StoreError> {
        self.inner.list_summaries().await
    }

    async fn sweep_interrupted(
        &self,
        error: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.sweep_interrupted(error, ended_at).await
    }
}

// ============================================================================
// Builders
// ============================================================================

pub async fn sqlite_store() -> SqliteJobStore {
    let pool = db::connect_in_memory()
        .await
        .expect("Failed to open in-memory database");
    let store = SqliteJobStore::new(pool);
    store.migrate().await.expect("Failed to migrate");
    store
}

pub fn orchestrator(
    durable: Arc<dyn DurableJobStore>,
    agent: Arc<ScriptedAgent>,
    max_concurrency: usize,
) -> SimulationOrchestrator {
    SimulationOrchestrator::new(
        JobStore::new(durable),
        TurnExecutor::new(agent, Duration::from_secs(5)),
        ConcurrencyLimiter::new(max_concurrency),
        test_agent(),
    )
}

pub async fn in_memory_orchestrator(
    agent: Arc<ScriptedAgent>,
    max_concurrency: usize,
) -> SimulationOrchestrator {
    orchestrator(Arc::new(sqlite_store().await), agent, max_concurrency)
}
