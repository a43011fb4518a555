//! Transport
//!
//! One long-lived bidirectional text-frame connection to the gateway.
//! Transport callbacks are turned into [`TransportEvent`]s on a single
//! channel consumed by the link's processing task. Each connection attempt
//! carries a generation number so events from a dead socket are ignored.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::{LinkError, LinkResult};

/// Something written to the open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

/// Write half of an open transport
pub type TransportWriter = mpsc::UnboundedSender<Outbound>;

/// Callback-equivalent events emitted by a transport
#[derive(Debug)]
pub enum TransportEvent {
    Opened(TransportWriter),
    Message(String),
    Closed { code: u16, reason: String },
    Errored(String),
}

/// Event sink handed to a connector for one connection attempt
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn opened(&self, writer: TransportWriter) -> bool {
        self.emit(TransportEvent::Opened(writer))
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn errored(&self, error: impl Into<String>) -> bool {
        self.emit(TransportEvent::Errored(error.into()))
    }
}

/// Opens transports to the gateway
///
/// Implementations must emit `Opened` on the sink before any `Message`,
/// and exactly one of `Closed`/`Errored` when the connection ends.
/// A connect failure is reported through the returned error instead.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, sink: TransportSink) -> LinkResult<()>;
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, sink: TransportSink) -> LinkResult<()> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        // Pongs must go out on the same write half
        let control_tx = tx.clone();

        sink.opened(tx);

        let generation = sink.generation();
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let result = match outbound {
                    Outbound::Text(text) => write.send(Message::Text(text)).await,
                    Outbound::Pong(data) => write.send(Message::Pong(data)).await,
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closing".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(generation, error = %e, "Gateway write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if !sink.message(text) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            sink.message(text);
                        }
                        Err(_) => tracing::debug!(generation, "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = control_tx.send(Outbound::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        sink.closed(code, reason);
                        break;
                    }
                    Some(Err(e)) => {
                        sink.errored(e.to_string());
                        break;
                    }
                    None => {
                        sink.closed(1006, "stream ended");
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}
