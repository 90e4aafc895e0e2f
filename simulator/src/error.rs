//! Orchestrator-level error taxonomy.
//!
//! Turn-level failures live in [`crate::executor::TurnExecutionError`] and are
//! recorded inline; storage failures in [`crate::job_store::StoreError`].

use crate::job_store::StoreError;

/// Errors surfaced by job creation, or captured into a job's terminal state.
#[derive(Debug, thiserror::Error, Clone)]
pub enum SimulationError {
    /// CSV text could not be parsed. Raised before any job exists.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// No usable rows survived grouping. Raised before any job exists.
    #[error("Input contains no usable conversation rows")]
    EmptyInput,

    /// A per-conversation task died instead of returning a record.
    #[error("Conversation '{conversation_id}' task failed: {message}")]
    ConversationTask {
        conversation_id: String,
        message: String,
    },

    /// Durable storage failed. Fatal to the job.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SimulationError {
    /// Machine-readable code used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            SimulationError::MalformedInput(_) => "MALFORMED_INPUT",
            SimulationError::EmptyInput => "EMPTY_INPUT",
            SimulationError::ConversationTask { .. } => "CONVERSATION_TASK_ERROR",
            SimulationError::Store(_) => "STORE_ERROR",
        }
    }
}
