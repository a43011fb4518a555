//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::commands;
use super::hub::OutboundText;
use super::messages::{ClientMessage, Command, ServerMessage};
use crate::api::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundText>();

    // The full snapshot is queued ahead of any broadcast
    let link = state.link.clone();
    let greeting = || async move {
        Some(ServerMessage::Status {
            data: link.snapshot().await,
        })
    };
    let connection_id = match state.hub.register_with(tx, greeting).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting dashboard connection");
            let error_msg = ServerMessage::Error {
                message: e.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&error_msg) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Task to forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.to_string())).await.is_err() {
                tracing::debug!(
                    connection_id = %conn_id_for_send,
                    "WebSocket send failed, closing connection"
                );
                break;
            }
        }
    });

    let state_for_recv = Arc::clone(&state);
    let conn_id_for_recv = connection_id.clone();

    // Task to receive messages from the socket and handle them
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&state_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    state.hub.unregister(&connection_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(state: &Arc<AppState>, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(state, connection_id, client_msg).await,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Invalid client message"
                    );
                    let error_msg = ServerMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    };
                    let _ = state.hub.send_to(connection_id, &error_msg).await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let error_msg = ServerMessage::Error {
                message: "Binary messages not supported".to_string(),
            };
            let _ = state.hub.send_to(connection_id, &error_msg).await;
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

async fn handle_client_message(state: &Arc<AppState>, connection_id: &str, message: ClientMessage) {
    match message {
        ClientMessage::GetStatus => {
            let snapshot = state.link.snapshot().await;
            let _ = state
                .hub
                .send_to(connection_id, &ServerMessage::Status { data: snapshot })
                .await;
        }
        ClientMessage::Command { payload } => {
            // Commands may wait on the gateway; keep reading meanwhile
            let state = Arc::clone(state);
            let connection_id = connection_id.to_string();
            tokio::spawn(async move { run_command(&state, &connection_id, payload).await });
        }
    }
}

async fn run_command(state: &AppState, connection_id: &str, command: Command) {
    let reply = match commands::execute(&state.link, &state.hub, &command).await {
        Ok(result) => ServerMessage::CommandResult { command, result },
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                action = %command.action,
                error = %e,
                "Dashboard command failed"
            );
            ServerMessage::Error {
                message: e.to_string(),
            }
        }
    };
    let _ = state.hub.send_to(connection_id, &reply).await;
}
