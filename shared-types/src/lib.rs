//! Shared types between the simulation engine and its clients
//!
//! These types cross two boundaries:
//! - the HTTP API (JSON request/response bodies)
//! - the durable store (turn results are persisted as a JSON blob)
//!
//! Serializable with serde for JSON over HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Job Lifecycle
// ============================================================================

/// Lifecycle of one bulk-simulation run.
///
/// Legal transitions: `pending -> processing -> {completed, failed}`, plus
/// `pending -> failed` when a job aborts before dispatch starts.
/// Both terminal states are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobStatus(pub String);

impl fmt::Display for UnknownJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status '{}'", self.0)
    }
}

impl std::error::Error for UnknownJobStatus {}

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownJobStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Remote Agent
// ============================================================================

/// Which conversational agent a job replays against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentLocator {
    pub project_id: String,
    pub location: String,
    pub agent_id: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

fn default_language_code() -> String {
    "en".to_string()
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of replaying one turn. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    pub conversation_id: String,
    /// 1-based position within the conversation after ordering
    pub turn_number: u32,
    pub user_input: String,
    pub response_text: String,
    pub matched_intent: Option<String>,
    pub confidence: f64,
    pub current_page: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Ordered turn results of one conversation, persisted once at completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub turns: Vec<TurnResult>,
    pub overall_passed: bool,
    pub execution_time_ms: u64,
    /// Set when the conversation task itself failed rather than a single turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationRecord {
    /// Build a record from replayed turns; passes iff no turn errored.
    pub fn from_turns(
        conversation_id: impl Into<String>,
        turns: Vec<TurnResult>,
        execution_time_ms: u64,
    ) -> Self {
        let overall_passed = !turns.iter().any(TurnResult::is_error);
        Self {
            conversation_id: conversation_id.into(),
            turns,
            overall_passed,
            execution_time_ms,
            error: None,
        }
    }

    /// Record for a conversation whose task died before producing turns.
    pub fn task_failed(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turns: Vec::new(),
            overall_passed: false,
            execution_time_ms: 0,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Job Views
// ============================================================================

/// Read view of a job: live while in flight, reconstructed from storage after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationJob {
    pub id: String,
    pub status: JobStatus,
    /// Conversations settled so far
    pub progress: u32,
    /// Conversations discovered in the input
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub results: Vec<ConversationRecord>,
}

impl SimulationJob {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            status: self.status,
            total: self.total,
            progress: self.progress,
            passed: self.passed,
            failed: self.failed,
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error.clone(),
        }
    }
}

/// Durable job-summary row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    pub total: u32,
    pub progress: u32,
    pub passed: u32,
    pub failed: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSimulationRequest {
    /// Raw CSV text, first line is the header
    pub csv: String,
    #[serde(default)]
    pub agent: Option<AgentLocator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSimulationResponse {
    pub job_id: String,
}

/// Machine-readable API error body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(error: Option<&str>) -> TurnResult {
        TurnResult {
            conversation_id: "greet".to_string(),
            turn_number: 1,
            user_input: "hello".to_string(),
            response_text: "hi there".to_string(),
            matched_intent: Some("greeting".to_string()),
            confidence: 0.9,
            current_page: None,
            timestamp: Utc::now(),
            error: error.map(ToString::to_string),
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_text_form() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_record_passes_only_without_turn_errors() {
        let ok = ConversationRecord::from_turns("greet", vec![turn(None), turn(None)], 12);
        assert!(ok.overall_passed);

        let bad = ConversationRecord::from_turns("greet", vec![turn(None), turn(Some("boom"))], 12);
        assert!(!bad.overall_passed);

        let died = ConversationRecord::task_failed("greet", "panicked");
        assert!(!died.overall_passed);
        assert!(died.turns.is_empty());
    }

    #[test]
    fn test_agent_locator_defaults_language() {
        let locator: AgentLocator = serde_json::from_value(serde_json::json!({
            "project_id": "p",
            "location": "global",
            "agent_id": "a"
        }))
        .unwrap();
        assert_eq!(locator.language_code, "en");
    }
}
