//! Bulk simulation endpoints
//!
//! Job creation answers as soon as the job row exists; processing continues in
//! the background and is observed through `GET /api/simulations/{job_id}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared_types::{ApiError, CreateSimulationRequest, CreateSimulationResponse};

use crate::app_state::AppState;
use crate::error::SimulationError;
use crate::job_store::StoreError;

/// Error codes for machine-readable error responses
#[derive(Debug, Clone, Copy)]
pub enum SimulationErrorCode {
    MalformedInput,
    EmptyInput,
    JobNotFound,
    ConversationTask,
    StoreError,
}

impl SimulationErrorCode {
    fn as_str(&self) -> &'static str {
        match self {
            SimulationErrorCode::MalformedInput => "MALFORMED_INPUT",
            SimulationErrorCode::EmptyInput => "EMPTY_INPUT",
            SimulationErrorCode::JobNotFound => "JOB_NOT_FOUND",
            SimulationErrorCode::ConversationTask => "CONVERSATION_TASK_ERROR",
            SimulationErrorCode::StoreError => "STORE_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            SimulationErrorCode::MalformedInput | SimulationErrorCode::EmptyInput => {
                StatusCode::BAD_REQUEST
            }
            SimulationErrorCode::JobNotFound => StatusCode::NOT_FOUND,
            SimulationErrorCode::ConversationTask | SimulationErrorCode::StoreError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<&SimulationError> for SimulationErrorCode {
    fn from(err: &SimulationError) -> Self {
        match err {
            SimulationError::MalformedInput(_) => SimulationErrorCode::MalformedInput,
            SimulationError::EmptyInput => SimulationErrorCode::EmptyInput,
            SimulationError::ConversationTask { .. } => SimulationErrorCode::ConversationTask,
            SimulationError::Store(_) => SimulationErrorCode::StoreError,
        }
    }
}

fn error_response(code: SimulationErrorCode, message: impl Into<String>) -> Response {
    (
        code.status_code(),
        Json(ApiError {
            code: code.as_str().to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

fn map_simulation_error(err: SimulationError) -> Response {
    error_response(SimulationErrorCode::from(&err), err.to_string())
}

fn map_store_error(err: StoreError) -> Response {
    tracing::error!(error = %err, "Job store read failed");
    error_response(SimulationErrorCode::StoreError, err.to_string())
}

/// POST /api/simulations
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateSimulationRequest>,
) -> Response {
    let orchestrator = state.orchestrator();
    let agent = request
        .agent
        .unwrap_or_else(|| orchestrator.default_agent().clone());

    match orchestrator.create_job_for_agent(&request.csv, agent).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(CreateSimulationResponse { job_id }),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(code = err.code(), error = %err, "Rejected simulation request");
            map_simulation_error(err)
        }
    }
}

/// GET /api/simulations
pub async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.store().list_summaries().await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(err) => map_store_error(err),
    }
}

/// GET /api/simulations/{job_id}
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.store().get(&job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(
            SimulationErrorCode::JobNotFound,
            format!("Simulation job not found: {job_id}"),
        ),
        Err(err) => map_store_error(err),
    }
}
