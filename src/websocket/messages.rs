//! WebSocket Message Types
//!
//! Downstream protocol spoken between the relay and dashboard clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::{ForwardedEvent, Snapshot};

/// Instruction sent by a dashboard; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Recognised action or a raw gateway method name
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Command { payload: Command },
    /// Ask for the current snapshot
    GetStatus,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Snapshot sent to one client (on connect or `getStatus`)
    Status { data: Snapshot },
    /// Snapshot broadcast after a state change or by the ticker
    StatusUpdate { data: Snapshot },
    Error { message: String },
    CommandResult { command: Command, result: Value },
    AgentEvent { data: Value },
    ChatEvent { data: Value },
    GatewayEvent { event: String, data: Value },
}

impl From<ForwardedEvent> for ServerMessage {
    fn from(event: ForwardedEvent) -> Self {
        match event {
            ForwardedEvent::Agent(data) => ServerMessage::AgentEvent { data },
            ForwardedEvent::Chat(data) => ServerMessage::ChatEvent { data },
            ForwardedEvent::Gateway { event, data } => ServerMessage::GatewayEvent { event, data },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayState;
    use serde_json::json;

    #[test]
    fn test_client_message_deserialize_command() {
        let json = r#"{"type": "command", "payload": {"action": "message", "content": "hi"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Command { payload } => {
                assert_eq!(payload.action, "message");
                assert_eq!(payload.content.as_deref(), Some("hi"));
                assert!(payload.params.is_none());
            }
            _ => panic!("Expected Command"),
        }
    }

    #[test]
    fn test_client_message_deserialize_get_status() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "getStatus"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::GetStatus));
    }

    #[test]
    fn test_unknown_client_message_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "subscribe"}"#).is_err());
    }

    #[test]
    fn test_status_update_shape() {
        let msg = ServerMessage::StatusUpdate {
            data: GatewayState::default(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "statusUpdate");
        assert_eq!(value["data"]["status"], "disconnected");
    }

    #[test]
    fn test_forwarded_events_map_to_types() {
        let msg: ServerMessage = ForwardedEvent::Chat(json!({"text": "yo"})).into();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "chatEvent", "data": {"text": "yo"}}));

        let msg: ServerMessage = ForwardedEvent::Gateway {
            event: "cron".to_string(),
            data: json!(1),
        }
        .into();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "gatewayEvent", "event": "cron", "data": 1}));
    }

    #[test]
    fn test_command_result_shape() {
        let msg = ServerMessage::CommandResult {
            command: Command {
                action: "sessions".to_string(),
                params: None,
                content: None,
            },
            result: json!({"sessions": []}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "commandResult");
        assert_eq!(value["command"], json!({"action": "sessions"}));
    }
}
