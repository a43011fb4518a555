//! Gateway Link
//!
//! Owns the transport, correlator, handshake, ingestor and reconnection
//! scheduler. All state mutation happens on one processing task fed by two
//! channels: transport events and link commands. Callers hold a cheap
//! [`GatewayLink`] handle that can issue requests and read snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use super::backoff::ReconnectBackoff;
use super::correlator::{Correlator, PendingHandle};
use super::error::{LinkError, LinkResult};
use super::frame::{InboundFrame, OutboundFrame, ResponseFrame};
use super::handshake::{apply_hello, HandshakeConfig, HandshakeGate, CONNECT_METHOD};
use super::ingest::{ingest, ForwardedEvent, IngestAction, SeqGapPolicy};
use super::state::{sessions_from_payload, GatewayState, LinkStatus, Snapshot};
use super::transport::{Connector, Outbound, TransportEvent, TransportSink, TransportWriter};

/// What to do after the gateway rejects or ignores our authenticate request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeFailurePolicy {
    /// Stay in `auth_failed`/`timeout` until the transport closes
    #[default]
    WaitForClose,
    /// Close the transport ourselves and let the scheduler retry
    Reconnect,
}

/// Gateway link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket URL of the gateway
    pub url: String,
    pub handshake: HandshakeConfig,
    pub request_timeout: Duration,
    /// How long to wait for `connect.challenge` before authenticating without a nonce
    pub challenge_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub on_handshake_failure: HandshakeFailurePolicy,
    pub on_seq_gap: SeqGapPolicy,
    /// Session used by `chat.send` when the caller names none
    pub session_key: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            handshake: HandshakeConfig::default(),
            request_timeout: Duration::from_millis(15_000),
            challenge_timeout: Duration::from_millis(3_000),
            reconnect_initial: Duration::from_millis(1_000),
            reconnect_max: Duration::from_millis(30_000),
            on_handshake_failure: HandshakeFailurePolicy::default(),
            on_seq_gap: SeqGapPolicy::default(),
            session_key: "main".to_string(),
        }
    }
}

/// Notifications published by the link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    StateChanged(Snapshot),
    Forward(ForwardedEvent),
}

/// Result of the memory listing fallback chain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryListing {
    pub files: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MemoryListing {
    fn from_payload(method: &str, payload: Value) -> Self {
        let files = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("files").or_else(|| map.remove("memory")) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) => Vec::new(),
                Some(other) => vec![other],
                None if map.is_empty() => Vec::new(),
                None => vec![Value::Object(map)],
            },
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Self {
            files,
            source: Some(method.to_string()),
            note: None,
        }
    }

    fn unavailable() -> Self {
        Self {
            files: Vec::new(),
            source: None,
            note: Some("Memory listing is not available from this gateway".to_string()),
        }
    }
}

/// Messages for the processing task
enum Command {
    Connect,
    Reconnect,
    Shutdown(oneshot::Sender<()>),
    HandshakeDone {
        generation: u64,
        result: LinkResult<Value>,
    },
    SessionsLoaded(Vec<Value>),
}

struct LinkInner {
    config: LinkConfig,
    state: RwLock<GatewayState>,
    correlator: Correlator,
    writer: Mutex<Option<TransportWriter>>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkInner {
    fn writer(&self) -> MutexGuard<'_, Option<TransportWriter>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register and send a request while holding the writer lock
    ///
    /// Closing the transport takes the same lock before flushing the
    /// correlator, so a request is either flushed or sees `NotConnected`.
    fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> LinkResult<PendingHandle> {
        let writer = self.writer();
        let writer = writer.as_ref().ok_or(LinkError::NotConnected)?;

        let handle = self.correlator.register(method, timeout);
        let sent = OutboundFrame::request(handle.id.clone(), method, params)
            .to_text()
            .and_then(|text| {
                writer
                    .send(Outbound::Text(text))
                    .map_err(|_| LinkError::TransportClosed)
            });

        if let Err(e) = sent {
            self.correlator.take(&handle.id);
            return Err(e);
        }

        tracing::debug!(request_id = %handle.id, method = %method, "Sent gateway request");
        Ok(handle)
    }

    fn send_frame(&self, frame: &OutboundFrame) -> LinkResult<()> {
        let text = frame.to_text()?;
        let writer = self.writer();
        let writer = writer.as_ref().ok_or(LinkError::NotConnected)?;
        writer
            .send(Outbound::Text(text))
            .map_err(|_| LinkError::TransportClosed)
    }

    fn publish(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Handle to the gateway link
#[derive(Clone)]
pub struct GatewayLink {
    inner: Arc<LinkInner>,
}

impl GatewayLink {
    /// Create the link and start its processing task
    ///
    /// The link starts `disconnected`; call [`GatewayLink::connect`] to dial.
    pub fn spawn(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let backoff = ReconnectBackoff::new(config.reconnect_initial, config.reconnect_max);

        let inner = Arc::new(LinkInner {
            config,
            state: RwLock::new(GatewayState::default()),
            correlator: Correlator::new(),
            writer: Mutex::new(None),
            commands: commands_tx,
            events: events_tx,
        });

        let actor = LinkActor {
            inner: Arc::clone(&inner),
            connector,
            commands: commands_rx,
            transport_tx,
            transport_rx,
            generation: 0,
            phase: Phase::Idle,
            gate: HandshakeGate::default(),
            challenge_deadline: None,
            reconnect_at: None,
            backoff,
        };
        tokio::spawn(actor.run());

        Self { inner }
    }

    /// Dial the gateway; a no-op while a transport is open or opening
    pub fn connect(&self) {
        let _ = self.inner.commands.send(Command::Connect);
    }

    /// Close the current transport and dial again immediately
    pub fn reconnect(&self) {
        let _ = self.inner.commands.send(Command::Reconnect);
    }

    /// Close the transport, reject pending requests and stop the processing task
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a request using the configured timeout
    pub async fn request(&self, method: &str, params: Value) -> LinkResult<Value> {
        self.request_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> LinkResult<Value> {
        let handle = self.inner.send_request(method, params, timeout)?;
        self.inner.correlator.wait(handle).await
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.state.read().await.snapshot()
    }

    pub async fn status(&self) -> LinkStatus {
        self.inner.state.read().await.status
    }

    /// Receiver for state changes and forwarded events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Requests still waiting for an answer
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Fetch `sessions.list` and replace the cached sessions
    pub async fn refresh_sessions(&self) -> LinkResult<Vec<Value>> {
        let payload = self.request("sessions.list", json!({})).await?;
        let sessions = sessions_from_payload(&payload);
        let _ = self
            .inner
            .commands
            .send(Command::SessionsLoaded(sessions.clone()));
        Ok(sessions)
    }

    /// List memory files: `memory.list`, then `state.memory`, then nothing
    pub async fn list_memory(&self) -> MemoryListing {
        for method in ["memory.list", "state.memory"] {
            match self.request(method, json!({})).await {
                Ok(payload) => return MemoryListing::from_payload(method, payload),
                Err(e) => {
                    tracing::debug!(method = %method, error = %e, "Memory listing method failed");
                }
            }
        }
        MemoryListing::unavailable()
    }

    /// Send a chat message to a gateway session
    pub async fn send_chat(&self, message: &str, session_key: Option<&str>) -> LinkResult<Value> {
        let session_key = session_key.unwrap_or(&self.inner.config.session_key);
        self.request(
            "chat.send",
            json!({ "message": message, "sessionKey": session_key }),
        )
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Open,
}

/// The single writer of the Gateway State
struct LinkActor {
    inner: Arc<LinkInner>,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    /// Bumped per connection attempt; events tagged otherwise are stale
    generation: u64,
    phase: Phase,
    gate: HandshakeGate,
    challenge_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    backoff: ReconnectBackoff,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl LinkActor {
    async fn run(mut self) {
        tracing::debug!(url = %self.inner.config.url, "Gateway link task started");
        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some((generation, event)) = self.transport_rx.recv() => {
                    self.handle_transport(generation, event).await;
                }
                _ = sleep_until_opt(self.challenge_deadline) => {
                    self.challenge_deadline = None;
                    self.fallback_handshake().await;
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.backoff.fire();
                    tracing::info!("Reconnecting to gateway");
                    self.connect().await;
                }
            }
        }
        tracing::debug!("Gateway link task stopped");
    }

    /// Returns false when the task should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.connect().await,
            Command::Reconnect => {
                tracing::info!("Forced gateway reconnect");
                self.teardown("reconnect requested").await;
                self.reconnect_at = None;
                self.backoff.cancel();
                self.connect().await;
            }
            Command::Shutdown(ack) => {
                self.teardown("link shutting down").await;
                self.reconnect_at = None;
                self.backoff.cancel();
                let snapshot = {
                    let mut state = self.inner.state.write().await;
                    state.mark_shutting_down();
                    state.snapshot()
                };
                self.inner.publish(LinkEvent::StateChanged(snapshot));
                let _ = ack.send(());
                return false;
            }
            Command::HandshakeDone { generation, result } => {
                if generation == self.generation && self.phase == Phase::Open {
                    self.finish_handshake(result).await;
                } else {
                    tracing::debug!(generation, "Ignoring stale handshake result");
                }
            }
            Command::SessionsLoaded(sessions) => {
                self.mutate(|state| {
                    state.replace_sessions(sessions);
                    true
                })
                .await;
            }
        }
        true
    }

    /// Apply `f` to the state and broadcast when it reports a change
    async fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut GatewayState) -> bool,
    {
        let snapshot = {
            let mut state = self.inner.state.write().await;
            if !f(&mut state) {
                return false;
            }
            state.snapshot()
        };
        self.inner.publish(LinkEvent::StateChanged(snapshot));
        true
    }

    async fn connect(&mut self) {
        if self.phase != Phase::Idle {
            tracing::debug!(phase = ?self.phase, "Connect ignored, transport already active");
            return;
        }
        self.reconnect_at = None;
        self.backoff.cancel();
        self.generation += 1;
        self.phase = Phase::Connecting;
        self.gate.reset();
        self.mutate(|state| state.transition(LinkStatus::Connecting))
            .await;

        let sink = TransportSink::new(self.generation, self.transport_tx.clone());
        let connector = Arc::clone(&self.connector);
        let url = self.inner.config.url.clone();
        tracing::info!(url = %url, generation = self.generation, "Connecting to gateway");

        tokio::spawn(async move {
            if let Err(e) = connector.connect(&url, sink.clone()).await {
                sink.errored(e.to_string());
            }
        });
    }

    async fn handle_transport(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            if let TransportEvent::Opened(writer) = event {
                let _ = writer.send(Outbound::Close);
            }
            tracing::trace!(generation, current = self.generation, "Dropping stale transport event");
            return;
        }

        match event {
            TransportEvent::Opened(writer) => {
                tracing::info!(generation, "Gateway transport opened");
                *self.inner.writer() = Some(writer);
                self.phase = Phase::Open;
                self.backoff.reset();
                self.challenge_deadline = Some(Instant::now() + self.inner.config.challenge_timeout);
                self.mutate(|state| state.transition(LinkStatus::AwaitingChallenge))
                    .await;
            }
            TransportEvent::Message(text) => self.handle_message(&text).await,
            TransportEvent::Closed { code, reason } => {
                tracing::warn!(code, reason = %reason, "Gateway transport closed");
                self.transport_lost(format!("connection closed ({code})")).await;
            }
            TransportEvent::Errored(error) => {
                tracing::warn!(error = %error, "Gateway transport error");
                self.transport_lost(error).await;
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed gateway frame");
                return;
            }
        };

        match frame {
            InboundFrame::Res(res) => self.handle_response(res),
            InboundFrame::Event(event) => {
                let actions = {
                    let mut state = self.inner.state.write().await;
                    ingest(&mut state, event, self.inner.config.on_seq_gap)
                };
                for action in actions {
                    self.apply(action).await;
                }
            }
        }
    }

    fn handle_response(&self, res: ResponseFrame) {
        let id = res.id.clone();
        if !self.inner.correlator.resolve(&id, res.into_result()) {
            tracing::debug!(request_id = %id, "Dropping response for unknown request");
        }
    }

    async fn apply(&mut self, action: IngestAction) {
        match action {
            IngestAction::Challenge { nonce } => self.on_challenge(nonce).await,
            IngestAction::EchoHeartbeat => {
                let ts = chrono::Utc::now().timestamp_millis();
                if let Err(e) = self.inner.send_frame(&OutboundFrame::heartbeat(ts)) {
                    tracing::warn!(error = %e, "Failed to echo heartbeat");
                }
            }
            IngestAction::StateChanged => {
                let snapshot = self.inner.state.read().await.snapshot();
                self.inner.publish(LinkEvent::StateChanged(snapshot));
            }
            IngestAction::Forward(event) => self.inner.publish(LinkEvent::Forward(event)),
            IngestAction::Resync => self.spawn_session_refresh(),
        }
    }

    async fn on_challenge(&mut self, nonce: Option<String>) {
        if self.phase != Phase::Open || !self.gate.begin() {
            tracing::debug!("Ignoring challenge, handshake already under way");
            return;
        }
        self.challenge_deadline = None;
        tracing::debug!(has_nonce = nonce.is_some(), "Received connect challenge");
        self.send_handshake(nonce).await;
    }

    async fn fallback_handshake(&mut self) {
        if self.phase != Phase::Open || !self.gate.begin() {
            return;
        }
        tracing::info!("No connect challenge received, authenticating without nonce");
        self.send_handshake(None).await;
    }

    async fn send_handshake(&mut self, nonce: Option<String>) {
        self.mutate(|state| state.transition(LinkStatus::Handshaking))
            .await;

        let params = self.inner.config.handshake.connect_params(nonce.as_deref());
        let handle =
            match self
                .inner
                .send_request(CONNECT_METHOD, params, self.inner.config.request_timeout)
            {
                Ok(handle) => handle,
                Err(e) => {
                    // The close event that follows drives the state
                    tracing::warn!(error = %e, "Failed to send connect request");
                    return;
                }
            };

        let generation = self.generation;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.correlator.wait(handle).await;
            let _ = inner
                .commands
                .send(Command::HandshakeDone { generation, result });
        });
    }

    async fn finish_handshake(&mut self, result: LinkResult<Value>) {
        match result {
            Ok(payload) => {
                let connected = self
                    .mutate(|state| {
                        if !state.transition(LinkStatus::Connected) {
                            return false;
                        }
                        apply_hello(state, &payload);
                        true
                    })
                    .await;
                if !connected {
                    tracing::debug!("Handshake finished after the link left handshaking");
                    return;
                }
                tracing::info!("Gateway handshake complete");
                self.spawn_session_refresh();
            }
            Err(LinkError::TransportClosed) | Err(LinkError::NotConnected) => {
                // Transport loss already moved us to disconnected
            }
            Err(LinkError::RequestTimeout { .. }) => {
                tracing::warn!("Gateway handshake timed out");
                self.mutate(|state| {
                    state.last_error = Some("handshake timed out".to_string());
                    state.transition(LinkStatus::Timeout)
                })
                .await;
                self.after_handshake_failure().await;
            }
            Err(e) => {
                let message = match e {
                    LinkError::Gateway { message } => message,
                    other => other.to_string(),
                };
                let error = LinkError::HandshakeFailed(message);
                tracing::error!(error = %error, "Gateway rejected handshake");
                self.mutate(|state| {
                    state.last_error = Some(error.to_string());
                    state.transition(LinkStatus::AuthFailed)
                })
                .await;
                self.after_handshake_failure().await;
            }
        }
    }

    async fn after_handshake_failure(&mut self) {
        match self.inner.config.on_handshake_failure {
            HandshakeFailurePolicy::WaitForClose => {
                tracing::debug!("Waiting for transport close before retrying");
            }
            HandshakeFailurePolicy::Reconnect => {
                self.teardown("handshake failed").await;
                self.schedule_reconnect();
            }
        }
    }

    fn spawn_session_refresh(&self) {
        let link = GatewayLink {
            inner: Arc::clone(&self.inner),
        };
        tokio::spawn(async move {
            if let Err(e) = link.refresh_sessions().await {
                tracing::warn!(error = %e, "Failed to fetch sessions");
            }
        });
    }

    async fn transport_lost(&mut self, reason: String) {
        self.release_transport(reason).await;
        self.schedule_reconnect();
    }

    /// Close the active transport ourselves, ignoring its later events
    async fn teardown(&mut self, reason: &str) {
        if self.phase == Phase::Idle {
            return;
        }
        self.generation += 1;
        if let Some(writer) = self.inner.writer().as_ref() {
            let _ = writer.send(Outbound::Close);
        }
        self.release_transport(reason.to_string()).await;
    }

    async fn release_transport(&mut self, reason: String) {
        self.phase = Phase::Idle;
        self.challenge_deadline = None;
        self.inner.writer().take();

        let rejected = self.inner.correlator.reject_all(LinkError::TransportClosed);
        if rejected > 0 {
            tracing::info!(rejected, "Rejected in-flight gateway requests");
        }

        self.mutate(|state| {
            state.last_error = Some(reason);
            state.transition(LinkStatus::Disconnected);
            true
        })
        .await;
    }

    fn schedule_reconnect(&mut self) {
        if let Some(delay) = self.backoff.arm() {
            tracing::info!(delay_ms = delay.as_millis() as u64, "Scheduling gateway reconnect");
            self.reconnect_at = Some(Instant::now() + delay);
        }
    }
}
