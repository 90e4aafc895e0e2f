//! Simulation orchestrator - CSV in, one bounded task per conversation.
//!
//! `create_job` parses and groups synchronously, writes the job row, and
//! returns the id; everything after runs in the background:
//!
//! 1. pending -> processing
//! 2. one limiter task per conversation, turns replayed strictly in order on a
//!    session owned by that conversation alone
//! 3. each task persists its record and advances progress
//! 4. await-all join; a task that dies is recorded as a failed conversation
//! 5. finalize (completed, or failed on a store outage) and evict the mirror
//!
//! A job whose dispatch never starts is finalized `failed` straight from
//! `pending`. If the terminal write itself keeps failing, the live entry is
//! marked failed and evicted after a retention window; the durable row is left
//! for the restart sweep.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use shared_types::{AgentLocator, ConversationRecord, JobStatus, TurnResult};
use tokio::task::JoinHandle;

use crate::csv_input;
use crate::error::SimulationError;
use crate::executor::{TurnExecutor, TurnRequest};
use crate::grouper::{self, Conversation};
use crate::job_store::{JobOutcome, JobStore, NewJob, StoreError};
use crate::limiter::ConcurrencyLimiter;

/// How long a job whose terminal write failed stays readable in the mirror.
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(600);

const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(50);

/// A job accepted for background processing.
#[derive(Debug)]
pub struct SubmittedJob {
    pub job_id: String,
    /// Resolves once the job is finalized, or once finalizing has given up
    pub handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct SimulationOrchestrator {
    store: JobStore,
    executor: TurnExecutor,
    limiter: ConcurrencyLimiter,
    agent: AgentLocator,
    failed_retention: Duration,
}

impl SimulationOrchestrator {
    pub fn new(
        store: JobStore,
        executor: TurnExecutor,
        limiter: ConcurrencyLimiter,
        agent: AgentLocator,
    ) -> Self {
        Self {
            store,
            executor,
            limiter,
            agent,
            failed_retention: DEFAULT_FAILED_RETENTION,
        }
    }

    pub fn with_failed_retention(mut self, retention: Duration) -> Self {
        self.failed_retention = retention;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn default_agent(&self) -> &AgentLocator {
        &self.agent
    }

    /// Start a job against the configured agent; returns before processing ends.
    pub async fn create_job(&self, csv_text: &str) -> Result<String, SimulationError> {
        self.create_job_for_agent(csv_text, self.agent.clone()).await
    }

    pub async fn create_job_for_agent(
        &self,
        csv_text: &str,
        agent: AgentLocator,
    ) -> Result<String, SimulationError> {
        self.submit(csv_text, agent).await.map(|job| job.job_id)
    }

    /// Like [`Self::create_job_for_agent`], keeping the background handle.
    ///
    /// Malformed or empty input fails here, before any job row exists.
    pub async fn submit(
        &self,
        csv_text: &str,
        agent: AgentLocator,
    ) -> Result<SubmittedJob, SimulationError> {
        let rows = csv_input::parse_rows(csv_text)?;
        let conversations = grouper::group(&rows)?;
        let total = u32::try_from(conversations.len()).map_err(|_| {
            SimulationError::MalformedInput(format!(
                "{} conversations exceed the per-job limit",
                conversations.len()
            ))
        })?;

        let job_id = ulid::Ulid::new().to_string();
        self.store
            .create(NewJob {
                id: job_id.clone(),
                total,
                started_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            job_id = %job_id,
            rows = rows.len(),
            conversations = total,
            max_concurrency = self.limiter.ceiling(),
            "Simulation job accepted"
        );

        let run = JobRun {
            job_id: job_id.clone(),
            store: self.store.clone(),
            executor: self.executor.clone(),
            agent,
            failed_retention: self.failed_retention,
        };
        let limiter = self.limiter.clone();
        let handle = tokio::spawn(run.drive(conversations, limiter));

        Ok(SubmittedJob { job_id, handle })
    }
}

// ============================================================================
// Background Run
// ============================================================================

#[derive(Debug, Default)]
struct Tally {
    passed: u32,
    failed: u32,
    fatal: Option<SimulationError>,
}

impl Tally {
    fn fatal(&mut self, err: SimulationError) {
        self.fatal.get_or_insert(err);
    }

    fn into_outcome(self) -> JobOutcome {
        match self.fatal {
            None => JobOutcome {
                status: JobStatus::Completed,
                passed: self.passed,
                failed: self.failed,
                error: None,
            },
            Some(err) => JobOutcome {
                status: JobStatus::Failed,
                passed: self.passed,
                failed: self.failed,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Everything one job's background work needs, owned.
#[derive(Clone)]
struct JobRun {
    job_id: String,
    store: JobStore,
    executor: TurnExecutor,
    agent: AgentLocator,
    failed_retention: Duration,
}

impl JobRun {
    async fn drive(self, conversations: Vec<Conversation>, limiter: ConcurrencyLimiter) {
        let outcome = match self.dispatch(conversations, &limiter).await {
            Ok(tally) => tally.into_outcome(),
            Err(err) => JobOutcome {
                status: JobStatus::Failed,
                passed: 0,
                failed: 0,
                error: Some(err.to_string()),
            },
        };
        self.finish(outcome).await;
    }

    async fn dispatch(
        &self,
        conversations: Vec<Conversation>,
        limiter: &ConcurrencyLimiter,
    ) -> Result<Tally, SimulationError> {
        self.store.mark_processing(&self.job_id).await?;

        let mut conversation_ids = Vec::with_capacity(conversations.len());
        let mut handles = Vec::with_capacity(conversations.len());
        for (index, conversation) in conversations.into_iter().enumerate() {
            conversation_ids.push(conversation.id.clone());
            let run = self.clone();
            handles.push(
                limiter
                    .spawn(async move { run.run_conversation(index, conversation).await })
                    .await,
            );
        }

        let mut tally = Tally::default();
        let settled = join_all(handles).await;
        for (conversation_id, result) in conversation_ids.into_iter().zip(settled) {
            match result {
                Ok(Ok(true)) => tally.passed += 1,
                Ok(Ok(false)) => tally.failed += 1,
                Ok(Err(err)) => {
                    tally.failed += 1;
                    tally.fatal(err.into());
                }
                Err(join_err) => {
                    tally.failed += 1;
                    let err = SimulationError::ConversationTask {
                        conversation_id: conversation_id.clone(),
                        message: join_err.to_string(),
                    };
                    tracing::warn!(
                        job_id = %self.job_id,
                        conversation_id = %conversation_id,
                        error = %err,
                        "Conversation task died"
                    );
                    let record = ConversationRecord::task_failed(conversation_id, err.to_string());
                    if let Err(store_err) = self
                        .store
                        .append_conversation_record(&self.job_id, record)
                        .await
                    {
                        tally.fatal(store_err.into());
                    }
                }
            }
        }

        Ok(tally)
    }

    /// Replay one conversation and persist its record. Returns `overall_passed`.
    async fn run_conversation(
        &self,
        index: usize,
        conversation: Conversation,
    ) -> Result<bool, StoreError> {
        let session_id = format!("{}-c{}", self.job_id, index);
        let started = Instant::now();
        let mut turns = Vec::with_capacity(conversation.turns.len());

        for (position, turn) in conversation.turns.iter().enumerate() {
            let turn_number = u32::try_from(position + 1).unwrap_or(u32::MAX);
            let request = TurnRequest {
                session_id: session_id.clone(),
                text: turn.text.clone(),
                agent: self.agent.clone(),
            };

            let result = match self.executor.execute(&request).await {
                Ok(reply) => TurnResult {
                    conversation_id: conversation.id.clone(),
                    turn_number,
                    user_input: turn.text.clone(),
                    response_text: reply.text,
                    matched_intent: reply.intent,
                    confidence: reply.confidence,
                    current_page: reply.page,
                    timestamp: Utc::now(),
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        conversation_id = %conversation.id,
                        turn_number,
                        error = %err,
                        "Turn failed"
                    );
                    TurnResult {
                        conversation_id: conversation.id.clone(),
                        turn_number,
                        user_input: turn.text.clone(),
                        response_text: String::new(),
                        matched_intent: None,
                        confidence: 0.0,
                        current_page: None,
                        timestamp: Utc::now(),
                        error: Some(err.to_string()),
                    }
                }
            };
            turns.push(result);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let record = ConversationRecord::from_turns(conversation.id, turns, elapsed_ms);
        let passed = record.overall_passed;
        let conversation_id = record.conversation_id.clone();

        self.store
            .append_conversation_record(&self.job_id, record)
            .await
            .map_err(|err| {
                tracing::error!(
                    job_id = %self.job_id,
                    conversation_id = %conversation_id,
                    error = %err,
                    "Failed to persist conversation record"
                );
                err
            })?;

        tracing::debug!(
            job_id = %self.job_id,
            conversation_id = %conversation_id,
            passed,
            elapsed_ms,
            "Conversation settled"
        );
        Ok(passed)
    }

    async fn finish(&self, outcome: JobOutcome) {
        let mut attempt = 1;
        loop {
            match self.store.finalize(&self.job_id, outcome.clone()).await {
                Ok(()) => {
                    self.store.evict(&self.job_id);
                    return;
                }
                Err(err @ StoreError::Database(_)) if attempt < FINALIZE_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        attempt,
                        error = %err,
                        "Finalize failed, retrying"
                    );
                    tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.abandon(outcome.error, err);
                    return;
                }
            }
        }
    }

    /// Give up on the terminal write: fail the live entry, evict it later.
    fn abandon(&self, job_error: Option<String>, err: StoreError) {
        tracing::error!(
            job_id = %self.job_id,
            error = %err,
            "Failed to finalize simulation job"
        );
        let message = job_error.unwrap_or_else(|| err.to_string());
        if let Err(live_err) = self.store.live().fail(&self.job_id, message, Utc::now()) {
            tracing::debug!(job_id = %self.job_id, error = %live_err, "Live entry already settled");
        }

        let store = self.store.clone();
        let job_id = self.job_id.clone();
        let retention = self.failed_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if store.evict(&job_id).is_some() {
                tracing::debug!(job_id = %job_id, "Evicted unfinalized job from live mirror");
            }
        });
    }
}
