//! WebSocket Connection Hub
//!
//! Tracks dashboard connections and fans messages out to them. Each client
//! has its own unbounded queue drained by its socket task, so a slow client
//! never holds up the others or the gateway link.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::messages::ServerMessage;

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// Serialized frame shared by every recipient of a broadcast
pub type OutboundText = Arc<str>;

/// Manages all dashboard connections
pub struct ConnectionHub {
    /// Active connections: ConnectionId → ConnectionHandle
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
    config: HubConfig,
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Period of the liveness `statusUpdate` broadcast
    pub status_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            status_interval: Duration::from_secs(10),
        }
    }
}

/// Handle for sending messages to a specific connection
pub struct ConnectionHandle {
    pub sender: mpsc::UnboundedSender<OutboundText>,
}

fn encode(message: &ServerMessage) -> Option<OutboundText> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            None
        }
    }
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new WebSocket connection
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<OutboundText>,
    ) -> Result<ConnectionId, HubError> {
        self.register_with(sender, || async { None }).await
    }

    /// Register a connection whose first frame is `greeting`
    ///
    /// The greeting is built and queued while the registry is write-locked,
    /// so no broadcast reaches the new client ahead of it.
    pub async fn register_with<F, Fut>(
        &self,
        sender: mpsc::UnboundedSender<OutboundText>,
        greeting: F,
    ) -> Result<ConnectionId, HubError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<ServerMessage>>,
    {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        if let Some(message) = greeting().await {
            let text = encode(&message).ok_or(HubError::SendFailed)?;
            sender.send(text).map_err(|_| HubError::SendFailed)?;
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(id.clone(), ConnectionHandle { sender });

        tracing::info!(connection_id = %id, clients = connections.len(), "Dashboard connected");
        Ok(id)
    }

    /// Remove a connection; unknown ids are ignored
    pub async fn unregister(&self, id: &str) {
        if self.connections.write().await.remove(id).is_some() {
            tracing::info!(connection_id = %id, "Dashboard disconnected");
        }
    }

    /// Serialize once and queue for every open client
    ///
    /// Clients whose queue is closed are skipped; they are removed by their
    /// own socket task. Returns the number of clients reached.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let connections = self.connections.read().await;
        let mut sent = 0;
        for (id, handle) in connections.iter() {
            if handle.sender.send(Arc::clone(&text)).is_ok() {
                sent += 1;
            } else {
                tracing::debug!(connection_id = %id, "Skipping closed dashboard connection");
            }
        }

        tracing::trace!(clients = sent, "Broadcast message");
        sent
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: &ServerMessage) -> Result<(), HubError> {
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;
        let text = encode(message).ok_or(HubError::SendFailed)?;

        handle.sender.send(text).map_err(|_| HubError::SendFailed)
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_message(text: &str) -> ServerMessage {
        ServerMessage::Error {
            message: text.to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.status_interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = ConnectionHub::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = hub.register(tx).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(hub.connection_count().await, 1);

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count().await, 0);

        // Second removal is a no-op
        hub.unregister(&id).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_greeting_queued_before_racing_broadcast() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = tokio::sync::oneshot::channel();

        let racing = Arc::clone(&hub);
        let greeting = move || async move {
            let task =
                tokio::spawn(async move { racing.broadcast(&error_message("update")).await });
            task_tx.send(task).unwrap();
            tokio::task::yield_now().await;
            Some(error_message("hello"))
        };
        hub.register_with(tx, greeting).await.unwrap();

        assert_eq!(task_rx.await.unwrap().await.unwrap(), 1);
        assert!(rx.recv().await.unwrap().contains("hello"));
        assert!(rx.recv().await.unwrap().contains("update"));
    }

    #[tokio::test]
    async fn test_greeting_skipped_when_full() {
        let hub = ConnectionHub::new(HubConfig {
            max_connections: 0,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = hub
            .register_with(tx, || async { Some(error_message("hello")) })
            .await;
        assert!(matches!(result, Err(HubError::TooManyConnections(0))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = ConnectionHub::new(HubConfig {
            max_connections: 2,
            ..Default::default()
        });

        let (tx1, _) = mpsc::unbounded_channel();
        let (tx2, _) = mpsc::unbounded_channel();
        let (tx3, _) = mpsc::unbounded_channel();

        hub.register(tx1).await.unwrap();
        hub.register(tx2).await.unwrap();
        let result = hub.register(tx3).await;

        assert_eq!(result.unwrap_err(), HubError::TooManyConnections(2));
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_client() {
        let hub = ConnectionHub::default();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        hub.register(tx_a).await.unwrap();
        let id_b = hub.register(tx_b).await.unwrap();
        hub.register(tx_c).await.unwrap();

        // B's socket went away but its close callback has not run yet
        drop(rx_b);

        let sent = hub.broadcast(&error_message("tick")).await;
        assert_eq!(sent, 2);

        let a = rx_a.try_recv().unwrap();
        let c = rx_c.try_recv().unwrap();
        assert_eq!(&*a, r#"{"type":"error","message":"tick"}"#);
        // Serialized once, shared by every recipient
        assert!(Arc::ptr_eq(&a, &c));

        // Skipped, not removed
        assert_eq!(hub.connection_count().await, 3);
        hub.unregister(&id_b).await;
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_send_to_single_client() {
        let hub = ConnectionHub::default();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = hub.register(tx1).await.unwrap();
        hub.register(tx2).await.unwrap();

        hub.send_to(&id1, &error_message("only you")).await.unwrap();
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        assert_eq!(
            hub.send_to("missing", &error_message("x")).await,
            Err(HubError::ConnectionNotFound)
        );
    }
}
