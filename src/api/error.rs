//! API Error Types
//!
//! Maps link and validation failures to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::gateway::LinkError;
use crate::websocket::CommandError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Gateway link failure
    #[error("Gateway error: {0}")]
    Link(#[from] LinkError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Invalid(message) => ApiError::Validation(message),
            CommandError::Link(e) => ApiError::Link(e),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Link(e) => match e {
                LinkError::NotConnected | LinkError::TransportClosed => {
                    (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
                }
                LinkError::RequestTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "GATEWAY_TIMEOUT"),
                LinkError::Gateway { .. } | LinkError::HandshakeFailed(_) => {
                    (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR")
                }
                LinkError::Parse(_) | LinkError::Transport(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "LINK_ERROR")
                }
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_status_codes() {
        let cases = [
            (LinkError::NotConnected, StatusCode::SERVICE_UNAVAILABLE),
            (LinkError::TransportClosed, StatusCode::SERVICE_UNAVAILABLE),
            (
                LinkError::RequestTimeout {
                    method: "status".to_string(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                LinkError::Gateway {
                    message: "denied".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (LinkError::Parse("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_invalid_command_is_bad_request() {
        let err = ApiError::from(CommandError::Invalid("missing".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
