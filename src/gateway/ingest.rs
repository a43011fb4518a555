//! Event Ingestor
//!
//! Applies server-pushed `event` frames to the Gateway State and reports
//! what the link has to do next (echo a heartbeat, broadcast, forward).
//! Unknown events are forwarded untouched and never fail.

use serde::Deserialize;
use serde_json::Value;

use super::frame::EventFrame;
use super::handshake::{challenge_nonce, CHALLENGE_EVENT};
use super::state::{GatewayState, LinkStatus};

/// What to do when an event's `seq` does not follow the previous one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqGapPolicy {
    /// Record and log only
    #[default]
    Ignore,
    /// Refetch sessions to resynchronise
    Resync,
}

/// Event passed through to dashboards without touching state
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardedEvent {
    Agent(Value),
    Chat(Value),
    Gateway { event: String, data: Value },
}

/// Follow-up work produced by one event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestAction {
    /// A handshake challenge arrived
    Challenge { nonce: Option<String> },
    /// Send a heartbeat event back right away
    EchoHeartbeat,
    /// State changed; dashboards need a fresh snapshot
    StateChanged,
    Forward(ForwardedEvent),
    /// Sequence gap under the resync policy
    Resync,
}

/// Apply one event frame to `state`
pub fn ingest(
    state: &mut GatewayState,
    frame: EventFrame,
    seq_policy: SeqGapPolicy,
) -> Vec<IngestAction> {
    let mut actions = Vec::new();
    let mut changed = false;

    if let Some(version) = frame.state_version.filter(|v| !v.is_null()) {
        if state.state_version.as_ref() != Some(&version) {
            changed = true;
        }
        state.record_version(version);
    }

    if let Some(seq) = frame.seq {
        if let Some(previous) = state.record_seq(seq) {
            match seq_policy {
                SeqGapPolicy::Ignore => {
                    tracing::debug!(previous, seq, event = %frame.event, "Event sequence gap");
                }
                SeqGapPolicy::Resync => {
                    tracing::warn!(previous, seq, event = %frame.event, "Event sequence gap, resyncing");
                    actions.push(IngestAction::Resync);
                }
            }
        }
    }

    let payload = frame.payload;
    match frame.event.as_str() {
        CHALLENGE_EVENT => {
            actions.push(IngestAction::Challenge {
                nonce: challenge_nonce(payload.as_ref()),
            });
        }
        "health" => {
            state.apply_health(payload.unwrap_or(Value::Null));
            changed = true;
        }
        "presence" | "system-presence" => {
            state.apply_presence(payload.unwrap_or(Value::Null));
            changed = true;
        }
        "tick" | "heartbeat" => {
            if let Some(uptime) = payload
                .as_ref()
                .and_then(|p| p.get("uptimeMs"))
                .and_then(Value::as_u64)
            {
                state.uptime_ms = Some(uptime);
                changed = true;
            }
            actions.push(IngestAction::EchoHeartbeat);
        }
        "agent" => {
            actions.push(IngestAction::Forward(ForwardedEvent::Agent(
                payload.unwrap_or(Value::Null),
            )));
        }
        "chat" => {
            actions.push(IngestAction::Forward(ForwardedEvent::Chat(
                payload.unwrap_or(Value::Null),
            )));
        }
        "shutdown" => {
            tracing::info!(payload = ?payload, "Gateway announced shutdown");
            if state.transition(LinkStatus::ShuttingDown) {
                changed = true;
            }
        }
        other => {
            tracing::trace!(event = %other, "Forwarding unhandled gateway event");
            actions.push(IngestAction::Forward(ForwardedEvent::Gateway {
                event: other.to_string(),
                data: payload.unwrap_or(Value::Null),
            }));
        }
    }

    if changed {
        actions.push(IngestAction::StateChanged);
    }
    actions
}
