//! Gateway State
//!
//! The single mutable view of the upstream gateway. Only the link's
//! processing task writes to it; everyone else gets a [`Snapshot`] copy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Connection status of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Handshaking,
    Connected,
    AuthFailed,
    Timeout,
    ShuttingDown,
}

impl LinkStatus {
    /// Whether the state machine permits moving from `self` to `next`
    pub fn allows(self, next: LinkStatus) -> bool {
        use LinkStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (AuthFailed, Connecting)
                | (Timeout, Connecting)
                | (Connecting, AwaitingChallenge)
                | (AwaitingChallenge, Handshaking)
                | (Handshaking, Connected)
                | (Handshaking, AuthFailed)
                | (Handshaking, Timeout)
                | (Connected, ShuttingDown)
                | (Connecting, Disconnected)
                | (AwaitingChallenge, Disconnected)
                | (Handshaking, Disconnected)
                | (Connected, Disconnected)
                | (AuthFailed, Disconnected)
                | (Timeout, Disconnected)
                | (ShuttingDown, Disconnected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::AwaitingChallenge => "awaiting_challenge",
            LinkStatus::Handshaking => "handshaking",
            LinkStatus::Connected => "connected",
            LinkStatus::AuthFailed => "auth_failed",
            LinkStatus::Timeout => "timeout",
            LinkStatus::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the relay knows about the gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayState {
    pub status: LinkStatus,
    pub agent: Option<Value>,
    pub model: Option<Value>,
    pub protocol: Option<Value>,
    pub health: Option<Value>,
    pub presence: Option<Value>,
    pub nodes: Vec<Value>,
    pub sessions: Vec<Value>,
    pub state_version: Option<Value>,
    pub limits: Option<Value>,
    pub policy: Option<Value>,
    pub connected_at: Option<DateTime<Utc>>,
    pub uptime_ms: Option<u64>,
    /// Last `seq` seen on an event frame (diagnostic only)
    pub last_seq: Option<u64>,
    /// Human readable reason for the last failure, if any
    pub last_error: Option<String>,
}

/// Read-only copy of the state handed to dashboards
pub type Snapshot = GatewayState;

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            agent: None,
            model: None,
            protocol: None,
            health: None,
            presence: None,
            nodes: Vec::new(),
            sessions: Vec::new(),
            state_version: None,
            limits: None,
            policy: None,
            connected_at: None,
            uptime_ms: None,
            last_seq: None,
            last_error: None,
        }
    }
}

impl GatewayState {
    /// Move to `next` if the state machine allows it
    ///
    /// Returns false (and leaves the status alone) for illegal transitions.
    pub fn transition(&mut self, next: LinkStatus) -> bool {
        if !self.status.allows(next) {
            tracing::debug!(from = %self.status, to = %next, "Ignoring illegal status transition");
            return false;
        }
        tracing::debug!(from = %self.status, to = %next, "Link status changed");
        self.status = next;
        match next {
            // `seq` restarts with every transport
            LinkStatus::Connecting => {
                self.last_seq = None;
            }
            LinkStatus::Connected => {
                self.connected_at = Some(Utc::now());
                self.last_error = None;
            }
            LinkStatus::Disconnected => {
                self.connected_at = None;
            }
            _ => {}
        }
        true
    }

    /// Local shutdown bypasses the table; it is the end of the line
    pub fn mark_shutting_down(&mut self) {
        self.status = LinkStatus::ShuttingDown;
    }

    /// Replace `presence`, and `nodes` when the payload carries a list
    pub fn apply_presence(&mut self, presence: Value) {
        if let Some(nodes) = presence.get("nodes").and_then(Value::as_array) {
            self.nodes = nodes.clone();
        }
        self.presence = Some(presence);
    }

    pub fn apply_health(&mut self, health: Value) {
        self.health = Some(health);
    }

    pub fn replace_sessions(&mut self, sessions: Vec<Value>) {
        self.sessions = sessions;
    }

    /// The gateway owns ordering: the last version seen always wins
    pub fn record_version(&mut self, version: Value) {
        self.state_version = Some(version);
    }

    /// Store `seq`, returning the previous value when this one is not its successor
    pub fn record_seq(&mut self, seq: u64) -> Option<u64> {
        let gap = match self.last_seq {
            Some(prev) if seq != prev.wrapping_add(1) => Some(prev),
            _ => None,
        };
        self.last_seq = Some(seq);
        gap
    }

    /// Copy for readers; without a gateway-reported uptime, derive it from `connected_at`
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = self.clone();
        if snapshot.uptime_ms.is_none() {
            snapshot.uptime_ms = self
                .connected_at
                .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64);
        }
        snapshot
    }
}

/// Pull the session list out of a `sessions.list` payload
///
/// The gateway answers either `{sessions:[...]}` or a bare array.
pub fn sessions_from_payload(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("sessions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = GatewayState::default();
        assert!(state.transition(LinkStatus::Connecting));
        assert!(state.transition(LinkStatus::AwaitingChallenge));
        assert!(state.transition(LinkStatus::Handshaking));
        assert!(state.transition(LinkStatus::Connected));
        assert!(state.connected_at.is_some());
        assert!(state.transition(LinkStatus::ShuttingDown));
        assert!(state.transition(LinkStatus::Disconnected));
        assert!(state.connected_at.is_none());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut state = GatewayState::default();
        assert!(!state.transition(LinkStatus::Connected));
        assert_eq!(state.status, LinkStatus::Disconnected);

        state.transition(LinkStatus::Connecting);
        assert!(!state.transition(LinkStatus::ShuttingDown));
        assert_eq!(state.status, LinkStatus::Connecting);
    }

    #[test]
    fn test_failed_handshake_can_retry() {
        let mut state = GatewayState::default();
        state.transition(LinkStatus::Connecting);
        state.transition(LinkStatus::AwaitingChallenge);
        state.transition(LinkStatus::Handshaking);
        assert!(state.transition(LinkStatus::AuthFailed));
        assert!(state.transition(LinkStatus::Connecting));
    }

    #[test]
    fn test_presence_replaces_nodes_only_when_present() {
        let mut state = GatewayState::default();
        state.apply_presence(json!({"nodes": [{"id": "a"}, {"id": "b"}]}));
        assert_eq!(state.nodes.len(), 2);

        state.apply_presence(json!({"online": true}));
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.presence.as_ref().unwrap()["online"], true);

        state.apply_presence(json!({"nodes": []}));
        assert!(state.nodes.is_empty());
    }

    #[test]
    fn test_seq_gap_detection() {
        let mut state = GatewayState::default();
        assert_eq!(state.record_seq(1), None);
        assert_eq!(state.record_seq(2), None);
        assert_eq!(state.record_seq(5), Some(2));
        assert_eq!(state.last_seq, Some(5));
    }

    #[test]
    fn test_seq_restarts_with_new_connection() {
        let mut state = GatewayState::default();
        state.transition(LinkStatus::Connecting);
        state.record_seq(41);
        state.record_seq(42);
        state.transition(LinkStatus::Disconnected);
        assert_eq!(state.last_seq, Some(42));

        assert!(state.transition(LinkStatus::Connecting));
        assert_eq!(state.last_seq, None);
        assert_eq!(state.record_seq(1), None);
    }

    #[test]
    fn test_sessions_from_payload_shapes() {
        assert_eq!(sessions_from_payload(&json!({"sessions": [1, 2]})).len(), 2);
        assert_eq!(sessions_from_payload(&json!([1, 2, 3])).len(), 3);
        assert!(sessions_from_payload(&json!({"other": 1})).is_empty());
        assert!(sessions_from_payload(&Value::Null).is_empty());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let mut state = GatewayState::default();
        state.record_version(json!(7));
        state.uptime_ms = Some(1234);
        let value = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(value["status"], "disconnected");
        assert_eq!(value["stateVersion"], 7);
        assert_eq!(value["uptimeMs"], 1234);
        assert!(value["connectedAt"].is_null());
    }

    #[test]
    fn test_snapshot_derives_uptime_when_connected() {
        let mut state = GatewayState::default();
        assert_eq!(state.snapshot().uptime_ms, None);

        state.connected_at = Some(Utc::now() - chrono::Duration::seconds(5));
        let uptime = state.snapshot().uptime_ms.unwrap();
        assert!(uptime >= 5000);
        // The stored state is untouched
        assert_eq!(state.uptime_ms, None);
    }
}
