//! Handshake Protocol
//!
//! challenge -> authenticate -> ready. The gateway pushes a
//! `connect.challenge` event carrying a nonce; we answer with a `connect`
//! request. Older gateways never send the challenge, so after a short guard
//! delay the link authenticates without a nonce instead.

use serde_json::{json, Map, Value};

use super::state::GatewayState;

/// Authenticate method name
pub const CONNECT_METHOD: &str = "connect";

/// Event carrying the handshake nonce
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Identity and credentials presented to the gateway
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client_id: String,
    pub client_version: String,
    pub platform: String,
    pub mode: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub token: Option<String>,
    pub device_id: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            min_protocol: 3,
            max_protocol: 3,
            client_id: "mission-control".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "ui".to_string(),
            role: "operator".to_string(),
            scopes: vec!["operator.read".to_string(), "operator.write".to_string()],
            token: None,
            device_id: format!("mission-control-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl HandshakeConfig {
    /// Build `connect` params; the device block is only present with a nonce
    pub fn connect_params(&self, nonce: Option<&str>) -> Value {
        let mut params = Map::new();
        params.insert("minProtocol".into(), json!(self.min_protocol));
        params.insert("maxProtocol".into(), json!(self.max_protocol));
        params.insert(
            "client".into(),
            json!({
                "id": self.client_id,
                "version": self.client_version,
                "platform": self.platform,
                "mode": self.mode,
            }),
        );
        params.insert("role".into(), json!(self.role));
        params.insert("scopes".into(), json!(self.scopes));

        // An absent auth object is valid, an empty or null one is not
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            params.insert("auth".into(), json!({ "token": token }));
        }

        if let Some(nonce) = nonce {
            params.insert(
                "device".into(),
                json!({ "id": self.device_id, "nonce": nonce }),
            );
        }

        Value::Object(params)
    }
}

/// Pull the nonce out of a challenge payload
pub fn challenge_nonce(payload: Option<&Value>) -> Option<String> {
    payload
        .and_then(|p| p.get("nonce"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Ensures exactly one authenticate request per transport
///
/// The challenge handler and the fallback guard both go through `begin`
/// on the processing task, so whichever comes first wins.
#[derive(Debug, Default)]
pub struct HandshakeGate {
    sent: bool,
}

impl HandshakeGate {
    pub fn begin(&mut self) -> bool {
        if self.sent {
            return false;
        }
        self.sent = true;
        true
    }

    pub fn reset(&mut self) {
        self.sent = false;
    }
}

/// Merge a successful `connect` response into the state
pub fn apply_hello(state: &mut GatewayState, payload: &Value) {
    if let Some(protocol) = payload.get("protocol") {
        state.protocol = Some(protocol.clone());
    }
    if let Some(policy) = payload.get("policy") {
        state.policy = Some(policy.clone());
    }
    if let Some(limits) = payload.get("limits") {
        state.limits = Some(limits.clone());
    }
    if let Some(presence) = payload.get("presence") {
        state.apply_presence(presence.clone());
    }
    if let Some(health) = payload.get("health") {
        state.apply_health(health.clone());
    }
    if let Some(version) = payload.get("stateVersion").filter(|v| !v.is_null()) {
        state.record_version(version.clone());
    }
    if let Some(uptime) = payload.get("uptimeMs").and_then(Value::as_u64) {
        state.uptime_ms = Some(uptime);
    }
    if let Some(agent) = payload.get("agent") {
        state.agent = Some(agent.clone());
    }
    if let Some(model) = payload.get("model") {
        state.model = Some(model.clone());
    }
}
