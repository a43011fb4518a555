//! # Mission Control
//!
//! Live relay between an agent-runtime gateway and dashboard clients.
//!
//! ## Modules
//!
//! - [`gateway`]: Gateway link (transport, handshake, request correlation,
//!   event ingestion, reconnection)
//! - [`websocket`]: Broadcast hub for dashboard clients
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mission_control::gateway::{GatewayLink, LinkConfig, WsConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let link = GatewayLink::spawn(LinkConfig::default(), Arc::new(WsConnector));
//!     link.connect();
//!
//!     let mut events = link.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod api;
pub mod config;
pub mod gateway;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};

pub use gateway::{
    GatewayLink, GatewayState, LinkConfig, LinkError, LinkEvent, LinkStatus, Snapshot, WsConnector,
};

pub use websocket::{
    websocket_handler, ClientMessage, Command, ConnectionHub, HubConfig, HubError, ServerMessage,
};
