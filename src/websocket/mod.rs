//! Broadcast Hub
//!
//! Fans gateway state out to dashboard clients over WebSocket and turns
//! their commands into Gateway Link calls.
//!
//! ## Protocol
//!
//! Server → client:
//! - `{type:"status"|"statusUpdate", data:<snapshot>}`
//! - `{type:"commandResult", command, result}` / `{type:"error", message}`
//! - `{type:"agentEvent"|"chatEvent", data}` / `{type:"gatewayEvent", event, data}`
//!
//! Client → server:
//! - `{type:"command", payload:{action, params?, content?}}`
//! - `{type:"getStatus"}`
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3001/ws');
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'command', payload: {action: 'sessions'}}));
//! };
//! ```

pub mod commands;
mod handler;
mod hub;
mod messages;
mod ticker;

pub use commands::CommandError;
pub use handler::websocket_handler;
pub use hub::{ConnectionHub, ConnectionId, HubConfig, HubError, OutboundText};
pub use messages::{ClientMessage, Command, ServerMessage};
pub use ticker::{start_event_relay, start_status_ticker};
