//! detectIntent-style HTTP client for the conversational agent platform.

use async_trait::async_trait;
use serde_json::Value;

use super::{AgentClient, AgentReply, TurnExecutionError, TurnOutcome, TurnRequest};

#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpAgentClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn session_url(&self, request: &TurnRequest) -> String {
        format!(
            "{}/v3/projects/{}/locations/{}/agents/{}/sessions/{}:detectIntent",
            self.base_url.trim_end_matches('/'),
            request.agent.project_id,
            request.agent.location,
            request.agent.agent_id,
            request.session_id,
        )
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn detect_intent(&self, request: &TurnRequest) -> TurnOutcome {
        let body = serde_json::json!({
            "queryInput": {
                "text": { "text": request.text },
                "languageCode": request.agent.language_code,
            }
        });

        let mut call = self.http.post(self.session_url(request)).json(&body);
        if let Some(token) = self.access_token.as_deref() {
            call = call.bearer_auth(token);
        }

        let response = call
            .send()
            .await
            .map_err(|e| TurnExecutionError::Remote(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TurnExecutionError::Remote(remote_error_message(
                status.as_u16(),
                &body,
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TurnExecutionError::InvalidResponse(e.to_string()))?;
        parse_detect_intent_response(&payload)
    }
}

/// Prefer the platform's `error.message`, fall back to the raw body.
fn remote_error_message(status: u16, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    format!("status {status}: {message}")
}

pub fn parse_detect_intent_response(payload: &Value) -> TurnOutcome {
    let result = payload.get("queryResult").ok_or_else(|| {
        TurnExecutionError::InvalidResponse("missing queryResult".to_string())
    })?;

    let text = result
        .get("responseMessages")
        .and_then(|v| v.as_array())
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("text")?.get("text")?.as_array())
                .flatten()
                .filter_map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let intent = result
        .get("match")
        .and_then(|m| m.get("intent"))
        .or_else(|| result.get("intent"))
        .and_then(|i| i.get("displayName"))
        .and_then(|v| v.as_str())
        .map(ToString::to_string);

    let confidence = result
        .get("match")
        .and_then(|m| m.get("confidence"))
        .and_then(|v| v.as_f64())
        .or_else(|| {
            result
                .get("intentDetectionConfidence")
                .and_then(|v| v.as_f64())
        })
        .unwrap_or(0.0);

    let page = result
        .get("currentPage")
        .and_then(|p| p.get("displayName"))
        .and_then(|v| v.as_str())
        .map(ToString::to_string);

    Ok(AgentReply {
        text,
        intent,
        confidence,
        page,
    })
}
