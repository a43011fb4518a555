//! REST API
//!
//! Thin HTTP layer over the gateway link, built with Axum.
//!
//! # Endpoints
//!
//! ## Gateway
//! - `GET /api/status` - Current gateway snapshot
//! - `GET /api/sessions` - Cached session list
//! - `GET /api/memory` - Memory files (with fallbacks)
//! - `POST /api/command` - Run a dashboard command
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe (gateway connected)
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /` or `GET /ws` - Dashboard streaming connection

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::websocket::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(routes::status::get_status))
        .route("/sessions", get(routes::status::list_sessions))
        .route("/memory", get(routes::command::list_memory))
        .route("/command", post(routes::command::run_command));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .nest("/api", api_routes)
        .nest("/health", health_routes)
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the HTTP server and run until `shutdown` resolves
pub async fn serve<F>(state: AppState, shutdown: F) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.addr();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Mission Control listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("HTTP server shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::transport::{Connector, TransportSink};
    use crate::gateway::{GatewayLink, LinkConfig, LinkError, LinkResult};
    use crate::websocket::ConnectionHub;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    struct Offline;

    #[async_trait::async_trait]
    impl Connector for Offline {
        async fn connect(&self, _url: &str, _sink: TransportSink) -> LinkResult<()> {
            Err(LinkError::Transport("offline".to_string()))
        }
    }

    fn create_test_app() -> Router {
        let link = GatewayLink::spawn(LinkConfig::default(), Arc::new(Offline));
        let hub = Arc::new(ConnectionHub::default());
        build_router(AppState::new(link, hub, ApiConfig::default()))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read(response).await
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read(response).await
    }

    async fn read(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (status, _) = get(create_test_app(), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_requires_gateway() {
        let (status, _) = get(create_test_app(), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (status, body) = get(create_test_app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["gateway"], "disconnected");
        assert_eq!(body["clients"], 0);
        assert!(body["uptimeSeconds"].is_u64());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (status, body) = get(create_test_app(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["sessions"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_sessions_empty() {
        let (status, body) = get(create_test_app(), "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"sessions": []}));
    }

    #[tokio::test]
    async fn test_memory_without_gateway() {
        let (status, body) = get(create_test_app(), "/api/memory").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], serde_json::json!([]));
        assert!(body["note"].is_string());
    }

    #[tokio::test]
    async fn test_command_status() {
        let (status, body) =
            post_json(create_test_app(), "/api/command", r#"{"action": "status"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_command_without_gateway() {
        let (status, body) =
            post_json(create_test_app(), "/api/command", r#"{"action": "cron.list"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "GATEWAY_UNAVAILABLE");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_command_missing_content() {
        let (status, body) =
            post_json(create_test_app(), "/api/command", r#"{"action": "message"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, body) = get(create_test_app(), "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["error"]["message"].as_str().unwrap().contains("/api/nope"));
    }

    #[tokio::test]
    async fn test_command_invalid_json() {
        let (status, _) = post_json(create_test_app(), "/api/command", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
