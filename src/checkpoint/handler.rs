//! HTTP handlers for the Checkpoint API
//!
//! - POST /api/v1/checkpoint/analyze            score incoming content
//! - POST /api/v1/checkpoint/scan-output        redact outgoing content
//! - POST /api/v1/checkpoint/sessions/:id/reset clear session taint
//! - GET  /api/v1/checkpoint/sessions/:id       session snapshot
//! - GET  /api/v1/checkpoint/status             policy and event overview

use super::service::Checkpoint;
use super::types::{AnalyzeRequest, ResetRequest, ScanOutputRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Shared state for checkpoint handlers
#[derive(Clone)]
pub struct CheckpointState {
    pub checkpoint: Arc<Checkpoint>,
}

/// Create the checkpoint router
pub fn checkpoint_router(state: CheckpointState) -> Router {
    Router::new()
        .route("/api/v1/checkpoint/analyze", post(analyze))
        .route("/api/v1/checkpoint/scan-output", post(scan_output))
        .route("/api/v1/checkpoint/sessions/:id", get(get_session))
        .route("/api/v1/checkpoint/sessions/:id/reset", post(reset_session))
        .route("/api/v1/checkpoint/status", get(get_status))
        .with_state(state)
}

/// POST /api/v1/checkpoint/analyze
async fn analyze(
    State(state): State<CheckpointState>,
    Json(request): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    Json(
        state
            .checkpoint
            .analyze_incoming_content(&request.content, request.session_id.as_deref())
            .await,
    )
}

/// POST /api/v1/checkpoint/scan-output
async fn scan_output(
    State(state): State<CheckpointState>,
    Json(request): Json<ScanOutputRequest>,
) -> impl IntoResponse {
    Json(
        state
            .checkpoint
            .scan_output_data(&request.data, request.session_id.as_deref())
            .await,
    )
}

/// POST /api/v1/checkpoint/sessions/:id/reset
async fn reset_session(
    State(state): State<CheckpointState>,
    Path(id): Path<String>,
    body: Option<Json<ResetRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Json(
        state
            .checkpoint
            .reset_session(
                Some(&id),
                request.actor.as_deref(),
                request.reason.as_deref(),
            )
            .await,
    )
}

/// GET /api/v1/checkpoint/sessions/:id
async fn get_session(
    State(state): State<CheckpointState>,
    Path(id): Path<String>,
) -> Response {
    match state.checkpoint.session(&id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": {"code": "NOT_FOUND", "message": format!("Session {} not found", id)}})),
        )
            .into_response(),
    }
}

/// GET /api/v1/checkpoint/status
async fn get_status(State(state): State<CheckpointState>) -> impl IntoResponse {
    Json(state.checkpoint.get_status().await)
}
