//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use tally_core::PaymentBackend;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
    pub backend_host: String,
    pub backend_healthy: bool,
    pub active_sessions: usize,
}

/// GET /api/health - Backend status and live session count
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend_healthy = state.backend.health_check().await;
    Json(HealthResponse {
        status: if backend_healthy { "ok" } else { "degraded" },
        backend: state.backend.name().to_string(),
        backend_host: state.backend.host().to_string(),
        backend_healthy,
        active_sessions: state.sessions.count().await,
    })
}
