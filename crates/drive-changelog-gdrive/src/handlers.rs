//! HTTP handlers.
//!
//! Implements:
//! - GET /status - Sync engine snapshot
//! - POST /trigger - Run one cycle now
//! - GET /health - Health check endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use drive_changelog_core::{CycleOutcome, CycleReport, SyncOrchestrator, SyncStatus};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, Result};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/trigger", post(trigger_handler))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
}

/// GET /health - Health check endpoint.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /status - Read-only snapshot; never waits for a running cycle.
pub async fn status_handler(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.orchestrator.status().await)
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: Option<CycleReport>,
}

/// POST /trigger - Run one cycle and report its outcome.
///
/// The cycle runs on its own task so a disconnecting client cannot cancel
/// it halfway.
pub async fn trigger_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    info!("Manual sync triggered");

    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = tokio::spawn(async move { orchestrator.try_run_cycle().await })
        .await
        .map_err(|e| ApiError::Internal(format!("Sync task failed: {}", e)))??;

    Ok(match outcome {
        CycleOutcome::Completed(report) => (
            StatusCode::OK,
            Json(TriggerResponse {
                status: "completed",
                report: Some(report),
            }),
        ),
        CycleOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(TriggerResponse {
                status: "already_running",
                report: None,
            }),
        ),
    })
}
