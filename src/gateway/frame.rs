//! Gateway wire frames
//!
//! JSON text frames exchanged with the gateway:
//!
//! - `{type:"req", id, method, params}` (outbound)
//! - `{type:"res", id, ok, payload?, error?}` (inbound)
//! - `{type:"event", event, payload?, stateVersion?, seq?}` (both ways)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{LinkError, LinkResult};

/// A frame received from the gateway
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Response to one of our requests
    Res(ResponseFrame),
    /// Server-pushed event
    Event(EventFrame),
}

impl InboundFrame {
    /// Decode a text frame
    pub fn parse(text: &str) -> LinkResult<Self> {
        serde_json::from_str(text).map_err(|e| LinkError::Parse(e.to_string()))
    }
}

/// Body of a `res` frame
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Turn the frame into the result handed to the waiting caller
    pub fn into_result(self) -> LinkResult<Value> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            let message = self
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "request failed".to_string());
            Err(LinkError::Gateway { message })
        }
    }
}

/// Error details carried by a failed response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of an `event` frame
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, rename = "stateVersion")]
    pub state_version: Option<Value>,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// A frame we send to the gateway
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Req {
        id: String,
        method: String,
        params: Value,
    },
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl OutboundFrame {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        OutboundFrame::Req {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Liveness echo answering a `tick`/`heartbeat` event
    pub fn heartbeat(ts: i64) -> Self {
        OutboundFrame::Event {
            event: "heartbeat".to_string(),
            payload: Some(serde_json::json!({ "ts": ts })),
        }
    }

    /// Serialize to the text sent over the transport
    pub fn to_text(&self) -> LinkResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
