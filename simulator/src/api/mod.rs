//! HTTP API routes for the simulation engine

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub mod simulations;

use crate::app_state::AppState;

/// Configure all API routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/simulations",
            get(simulations::list_jobs).post(simulations::create_job),
        )
        .route("/api/simulations/{job_id}", get(simulations::get_job))
}

/// Health check endpoint
pub async fn health_check(State(_state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "simulator",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
