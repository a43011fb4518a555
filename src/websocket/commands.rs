//! Dashboard command translation
//!
//! Recognised actions map onto Gateway Link operations. Anything else is
//! sent to the gateway as a request whose method is the action name, so new
//! gateway methods work without relay changes.

use serde_json::{json, Value};
use thiserror::Error;

use super::hub::ConnectionHub;
use super::messages::{Command, ServerMessage};
use crate::gateway::{GatewayLink, LinkError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Run one dashboard command and return its result payload
pub async fn execute(
    link: &GatewayLink,
    hub: &ConnectionHub,
    command: &Command,
) -> Result<Value, CommandError> {
    let action = command.action.trim();
    tracing::info!(action = %action, "Executing dashboard command");

    match action {
        "" => Err(CommandError::Invalid("command action is required".to_string())),
        "status" => {
            let snapshot = link.snapshot().await;
            let result = serde_json::to_value(&snapshot).map_err(LinkError::from)?;
            hub.broadcast(&ServerMessage::StatusUpdate { data: snapshot })
                .await;
            Ok(result)
        }
        "sessions" => {
            let sessions = link.refresh_sessions().await?;
            Ok(json!({ "sessions": sessions }))
        }
        "reconnect" => {
            link.reconnect();
            Ok(json!({ "reconnecting": true }))
        }
        "message" => {
            let text = message_text(command)
                .ok_or_else(|| CommandError::Invalid("message content is required".to_string()))?;
            let session_key = command
                .params
                .as_ref()
                .and_then(|p| p.get("sessionKey"))
                .and_then(Value::as_str);
            Ok(link.send_chat(&text, session_key).await?)
        }
        "memory" => {
            let listing = link.list_memory().await;
            Ok(serde_json::to_value(listing).map_err(LinkError::from)?)
        }
        method => {
            let params = command.params.clone().unwrap_or_else(|| json!({}));
            Ok(link.request(method, params).await?)
        }
    }
}

/// `content`, falling back to `params.message`
fn message_text(command: &Command) -> Option<String> {
    command
        .content
        .clone()
        .or_else(|| {
            command
                .params
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::transport::{Connector, TransportSink};
    use crate::gateway::{LinkConfig, LinkResult};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, _url: &str, _sink: TransportSink) -> LinkResult<()> {
            Err(LinkError::Transport("unreachable".to_string()))
        }
    }

    fn command(action: &str) -> Command {
        Command {
            action: action.to_string(),
            params: None,
            content: None,
        }
    }

    fn link() -> GatewayLink {
        GatewayLink::spawn(LinkConfig::default(), Arc::new(Unreachable))
    }

    #[test]
    fn test_message_text_sources() {
        let mut cmd = command("message");
        assert_eq!(message_text(&cmd), None);

        cmd.params = Some(json!({"message": "from params"}));
        assert_eq!(message_text(&cmd).as_deref(), Some("from params"));

        cmd.content = Some("from content".to_string());
        assert_eq!(message_text(&cmd).as_deref(), Some("from content"));

        cmd.content = Some("   ".to_string());
        assert_eq!(message_text(&cmd), None);
    }

    #[tokio::test]
    async fn test_status_rebroadcasts_snapshot() {
        let link = link();
        let hub = ConnectionHub::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.register(tx).await.unwrap();

        let result = execute(&link, &hub, &command("status")).await.unwrap();
        assert_eq!(result["status"], "disconnected");

        let text = rx.try_recv().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "statusUpdate");
    }

    #[tokio::test]
    async fn test_empty_action_rejected() {
        let hub = ConnectionHub::default();
        let err = execute(&link(), &hub, &command(" ")).await.unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_message_requires_content() {
        let hub = ConnectionHub::default();
        let err = execute(&link(), &hub, &command("message")).await.unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_unknown_action_goes_to_gateway() {
        let hub = ConnectionHub::default();
        let err = execute(&link(), &hub, &command("cron.list")).await.unwrap_err();
        assert_eq!(err, CommandError::Link(LinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_memory_without_gateway_is_not_an_error() {
        let hub = ConnectionHub::default();
        let result = execute(&link(), &hub, &command("memory")).await.unwrap();
        assert_eq!(result["files"], json!([]));
        assert!(result["note"].is_string());
    }
}
