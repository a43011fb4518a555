//! Background broadcasters
//!
//! The relay turns link events into dashboard messages; the ticker
//! re-broadcasts the snapshot on a fixed period as a liveness signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::hub::ConnectionHub;
use super::messages::ServerMessage;
use crate::gateway::{GatewayLink, LinkEvent};

/// Push every state change and forwarded event to all dashboards
pub fn start_event_relay(link: GatewayLink, hub: Arc<ConnectionHub>) -> JoinHandle<()> {
    let mut events = link.subscribe();

    tokio::spawn(async move {
        loop {
            let message = match events.recv().await {
                Ok(LinkEvent::StateChanged(snapshot)) => ServerMessage::StatusUpdate { data: snapshot },
                Ok(LinkEvent::Forward(event)) => event.into(),
                Err(RecvError::Lagged(skipped)) => {
                    // Dropped events are gone; the latest snapshot covers the state part
                    tracing::warn!(skipped, "Event relay lagged behind the gateway link");
                    ServerMessage::StatusUpdate {
                        data: link.snapshot().await,
                    }
                }
                Err(RecvError::Closed) => break,
            };
            hub.broadcast(&message).await;
        }
        tracing::debug!("Event relay stopped");
    })
}

/// Re-broadcast the snapshot every `period`
pub fn start_status_ticker(
    link: GatewayLink,
    hub: Arc<ConnectionHub>,
    period: Duration,
) -> JoinHandle<()> {
    tracing::info!(interval_secs = period.as_secs(), "Starting status ticker");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if hub.connection_count().await == 0 {
                continue;
            }
            let snapshot = link.snapshot().await;
            let sent = hub
                .broadcast(&ServerMessage::StatusUpdate { data: snapshot })
                .await;
            tracing::trace!(clients = sent, "Periodic status broadcast");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::transport::{Connector, TransportSink};
    use crate::gateway::{LinkConfig, LinkError, LinkResult};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _url: &str, _sink: TransportSink) -> LinkResult<()> {
            Err(LinkError::Transport("refused".to_string()))
        }
    }

    fn message_type(text: &str) -> String {
        let value: Value = serde_json::from_str(text).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_broadcasts_each_period() {
        let link = GatewayLink::spawn(LinkConfig::default(), Arc::new(Refusing));
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx).await.unwrap();

        let started = tokio::time::Instant::now();
        let handle = start_status_ticker(link, hub, Duration::from_secs(10));

        let first = rx.recv().await.unwrap();
        assert_eq!(message_type(&first), "statusUpdate");
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_forwards_state_changes() {
        let link = GatewayLink::spawn(LinkConfig::default(), Arc::new(Refusing));
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx).await.unwrap();

        let handle = start_event_relay(link.clone(), hub);
        link.connect();

        // connecting, then disconnected after the refused dial
        let text = rx.recv().await.unwrap();
        assert_eq!(message_type(&text), "statusUpdate");
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["data"]["status"], "connecting");

        let text = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["data"]["status"], "disconnected");

        link.shutdown().await;
        handle.abort();
    }
}
