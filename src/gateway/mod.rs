//! Gateway Link
//!
//! Client side of the upstream gateway protocol: a single WebSocket
//! connection carrying JSON `req`/`res`/`event` frames, a challenge based
//! handshake, request/response correlation with deadlines, and automatic
//! reconnection with exponential backoff.
//!
//! ```text
//! Connector ──TransportEvent──▶ link task ──▶ GatewayState
//!                                 │   ▲
//!                     LinkEvent ◀─┘   └── Command (connect, reconnect, ...)
//! ```

pub mod backoff;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ingest;
pub mod link;
pub mod state;
pub mod transport;

pub use error::{LinkError, LinkResult};
pub use handshake::HandshakeConfig;
pub use ingest::{ForwardedEvent, SeqGapPolicy};
pub use link::{GatewayLink, HandshakeFailurePolicy, LinkConfig, LinkEvent, MemoryListing};
pub use state::{GatewayState, LinkStatus, Snapshot};
pub use transport::{Connector, WsConnector};
