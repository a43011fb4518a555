//! Data Transfer Objects
//!
//! Response types for the REST endpoints. Requests reuse the dashboard
//! [`Command`](crate::websocket::Command) shape.

use serde::Serialize;
use serde_json::Value;

/// Result of `POST /api/command`
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub result: Value,
}

/// Cached session list
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Value>,
}

/// Full health response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// healthy when the gateway link is connected, degraded otherwise
    pub status: String,
    /// Gateway link status
    pub gateway: String,
    /// Connected dashboard clients
    pub clients: usize,
    pub uptime_seconds: u64,
    pub version: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}
