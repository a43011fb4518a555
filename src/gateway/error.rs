//! Gateway link error types
//!
//! Every failure the link can produce. None of them are fatal to the
//! process: they end up as status fields or `error` messages for dashboards.

use thiserror::Error;

/// Errors that can occur while talking to the gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No transport is open
    #[error("Gateway not connected")]
    NotConnected,

    /// No response arrived before the deadline
    #[error("Request timed out: {method}")]
    RequestTimeout { method: String },

    /// The gateway answered with `ok: false`
    #[error("Gateway error: {message}")]
    Gateway { message: String },

    /// The authenticate request was rejected
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The transport closed while the request was in flight
    #[error("Connection closed")]
    TransportClosed,

    /// A frame could not be decoded
    #[error("Malformed frame: {0}")]
    Parse(String),

    /// Connecting or writing to the transport failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Parse(err.to_string())
    }
}

/// Result type alias for link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::RequestTimeout {
            method: "sessions.list".to_string(),
        };
        assert_eq!(err.to_string(), "Request timed out: sessions.list");

        let err = LinkError::Gateway {
            message: "unknown method".to_string(),
        };
        assert_eq!(err.to_string(), "Gateway error: unknown method");
    }

    #[test]
    fn test_from_serde_error() {
        let err: LinkError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, LinkError::Parse(_)));
    }
}
