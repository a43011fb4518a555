//! Command Routes
//!
//! - POST /api/command - Run a dashboard command
//! - GET /api/memory - Memory listing with fallbacks

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::CommandResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::gateway::MemoryListing;
use crate::websocket::{commands, Command};

/// POST /api/command
///
/// Same translation as a dashboard `command` message.
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> ApiResult<Json<CommandResponse>> {
    let result = commands::execute(&state.link, &state.hub, &command).await?;
    Ok(Json(CommandResponse {
        success: true,
        result,
    }))
}

/// GET /api/memory
///
/// Never fails: a gateway without memory methods yields an empty list and a note.
pub async fn list_memory(State(state): State<Arc<AppState>>) -> Json<MemoryListing> {
    Json(state.link.list_memory().await)
}
