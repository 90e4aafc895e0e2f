//! Remote turn execution.
//!
//! [`TurnExecutor`] sends one utterance to the conversational agent for a
//! given session and returns a structured reply or a typed failure. Every call
//! is independent: no retry, no caching, no rate limiting. Each call carries a
//! timeout so one hung request cannot hold a limiter slot forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::AgentLocator;

pub mod http;

pub use http::HttpAgentClient;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// One utterance addressed to one remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub session_id: String,
    pub text: String,
    pub agent: AgentLocator,
}

/// Structured agent reply for one turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentReply {
    pub text: String,
    pub intent: Option<String>,
    pub confidence: f64,
    pub page: Option<String>,
}

pub type TurnOutcome = Result<AgentReply, TurnExecutionError>;

/// A single remote call failed. Recorded inline on the turn, never fatal.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum TurnExecutionError {
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent error: {0}")]
    Remote(String),

    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Boundary to the conversational agent platform.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn detect_intent(&self, request: &TurnRequest) -> TurnOutcome;
}

#[derive(Clone)]
pub struct TurnExecutor {
    client: Arc<dyn AgentClient>,
    timeout: Duration,
}

impl TurnExecutor {
    pub fn new(client: Arc<dyn AgentClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn execute(&self, request: &TurnRequest) -> TurnOutcome {
        match tokio::time::timeout(self.timeout, self.client.detect_intent(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Agent call timed out"
                );
                Err(TurnExecutionError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient(Duration);

    #[async_trait]
    impl AgentClient for SlowClient {
        async fn detect_intent(&self, request: &TurnRequest) -> TurnOutcome {
            tokio::time::sleep(self.0).await;
            Ok(AgentReply {
                text: format!("echo: {}", request.text),
                ..AgentReply::default()
            })
        }
    }

    struct RejectingClient;

    #[async_trait]
    impl AgentClient for RejectingClient {
        async fn detect_intent(&self, _request: &TurnRequest) -> TurnOutcome {
            Err(TurnExecutionError::Remote("session not found".to_string()))
        }
    }

    fn request(text: &str) -> TurnRequest {
        TurnRequest {
            session_id: "job-c0".to_string(),
            text: text.to_string(),
            agent: AgentLocator {
                project_id: "p".to_string(),
                location: "global".to_string(),
                agent_id: "a".to_string(),
                language_code: "en".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_passes_reply_through() {
        let executor = TurnExecutor::new(
            Arc::new(SlowClient(Duration::from_millis(1))),
            Duration::from_secs(5),
        );
        let reply = executor.execute(&request("hello")).await.unwrap();
        assert_eq!(reply.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_hung_call_becomes_timeout() {
        let executor = TurnExecutor::new(
            Arc::new(SlowClient(Duration::from_secs(10))),
            Duration::from_millis(20),
        );
        let err = executor.execute(&request("hello")).await.unwrap_err();
        assert_eq!(err, TurnExecutionError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_remote_failure_is_returned_not_retried() {
        let executor = TurnExecutor::new(Arc::new(RejectingClient), DEFAULT_TURN_TIMEOUT);
        let err = executor.execute(&request("hello")).await.unwrap_err();
        assert_eq!(err.to_string(), "Agent error: session not found");
    }
}
