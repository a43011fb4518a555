//! Status Routes
//!
//! Read-only views over the cached gateway state.
//!
//! - GET /api/status - Current snapshot
//! - GET /api/sessions - Cached session list

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::SessionsResponse;
use crate::api::state::AppState;
use crate::gateway::Snapshot;

/// GET /api/status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.link.snapshot().await)
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let snapshot = state.link.snapshot().await;
    Json(SessionsResponse {
        sessions: snapshot.sessions,
    })
}
