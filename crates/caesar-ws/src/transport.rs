//! Resilient WebSocket connection manager.
//!
//! One `WsTransport` owns one venue connection. The driver task owns the
//! socket; commands reach it over internal channels, so no lock is ever
//! held across network I/O. On read errors or heartbeat silence the
//! socket is closed, the circuit flips to `Open`, and the driver redials
//! with exponential backoff until it succeeds or the transport is closed.

use crate::error::{WsError, WsResult};
use caesar_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of each raw-frame subscriber channel.
const SUBSCRIBER_CAPACITY: usize = 512;
/// Capacity of the outgoing message queue.
const OUTBOX_CAPACITY: usize = 256;

/// Health of the connection as seen by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Healthy, trading may proceed.
    Closed,
    /// Unhealthy, disable trading.
    Open,
}

/// Tunable parameters for a `WsTransport`.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Label used in metrics and log fields (venue or tunnel name).
    pub label: String,
    /// Sizes for the connection write buffer.
    pub write_buffer_size: usize,
    /// Advisory read buffer size; the socket reads frame-by-frame, so
    /// this only bounds the reassembly buffer.
    pub read_buffer_size: usize,
    /// Maximum silence on the read side before the connection is
    /// considered dead and redialed.
    pub heartbeat_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_factor: f64,
    /// Extra headers for the upgrade request (venue authentication).
    pub headers: Vec<(String, String)>,
}

impl WsConfig {
    /// Defaults tuned for low-latency market data.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: "ws".to_string(),
            write_buffer_size: 4096,
            read_buffer_size: 4096,
            heartbeat_timeout: Duration::from_millis(500),
            backoff_initial: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
            backoff_factor: 2.0,
            headers: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Outcome of a single connection's lifetime, as seen by the driver.
enum ConnExit {
    /// Transport closed or context cancelled. Terminal.
    Cancelled,
    /// Read error, heartbeat silence, or server close. Redial.
    Failed,
}

/// Resilient, low-latency WebSocket connection manager.
pub struct WsTransport {
    cfg: WsConfig,
    circuit: AtomicU8,
    subs: RwLock<Vec<mpsc::Sender<Vec<u8>>>>,
    outbox_tx: mpsc::Sender<String>,
    /// Taken exactly once by the driver task on connect.
    outbox_rx: TokioMutex<Option<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Create a transport. Call [`WsTransport::connect`] to start.
    ///
    /// The circuit starts `Open`: no connection means no trading.
    pub fn new(cfg: WsConfig) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        Self {
            cfg,
            circuit: AtomicU8::new(CircuitState::Open as u8),
            subs: RwLock::new(Vec::new()),
            outbox_tx,
            outbox_rx: TokioMutex::new(Some(outbox_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Current circuit state. Lock-free; safe from any thread.
    pub fn circuit_state(&self) -> CircuitState {
        if self.circuit.load(Ordering::Acquire) == CircuitState::Closed as u8 {
            CircuitState::Closed
        } else {
            CircuitState::Open
        }
    }

    /// Subscribe to raw inbound frames.
    ///
    /// Every active subscriber receives a copy of every frame. A
    /// subscriber whose channel is full is silently skipped for that
    /// frame; slowness never propagates back to the socket. Register
    /// subscriptions before calling `connect` so no frame arriving
    /// between dial and subscribe is lost.
    pub fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subs.write().push(tx);
        rx
    }

    /// Enqueue a text frame for delivery. Non-blocking: a full outbox
    /// drops the message and counts the drop.
    pub fn send(&self, frame: String) {
        if self.outbox_tx.try_send(frame).is_err() {
            Metrics::ws_outbox_dropped(&self.cfg.label);
            warn!(label = %self.cfg.label, "outbox full, dropping outgoing message");
        }
    }

    /// Dial the endpoint and start the driver task. Blocks until the
    /// initial connection succeeds; after that the connection is
    /// maintained until [`WsTransport::close`].
    pub async fn connect(self: &Arc<Self>) -> WsResult<()> {
        let outbox_rx = self
            .outbox_rx
            .lock()
            .await
            .take()
            .ok_or(WsError::AlreadyConnected)?;

        let stream = match dial(&self.cfg).await {
            Ok(stream) => stream,
            Err(e) => {
                // Leave the transport reusable after a failed dial.
                *self.outbox_rx.lock().await = Some(outbox_rx);
                return Err(e);
            }
        };
        self.set_circuit(CircuitState::Closed);
        info!(label = %self.cfg.label, url = %self.cfg.url, "connected");

        let me = Arc::clone(self);
        tokio::spawn(async move { me.drive(stream, outbox_rx).await });
        Ok(())
    }

    /// Shut the transport down. Terminal; the driver exits and
    /// subscriber channels close once their senders drop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn set_circuit(&self, state: CircuitState) {
        self.circuit.store(state as u8, Ordering::Release);
        Metrics::ws_circuit(&self.cfg.label, state == CircuitState::Open);
    }

    /// Connection supervisor: run each connection to failure, then
    /// redial with backoff. Exits only on cancellation.
    async fn drive(self: Arc<Self>, stream: WsStream, mut outbox_rx: mpsc::Receiver<String>) {
        let mut stream = Some(stream);
        loop {
            let current = match stream.take() {
                Some(s) => s,
                None => return,
            };

            match self.run_connection(current, &mut outbox_rx).await {
                ConnExit::Cancelled => {
                    self.set_circuit(CircuitState::Open);
                    debug!(label = %self.cfg.label, "transport cancelled");
                    return;
                }
                ConnExit::Failed => {
                    self.set_circuit(CircuitState::Open);
                    match self.redial().await {
                        Some(next) => {
                            self.set_circuit(CircuitState::Closed);
                            stream = Some(next);
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Single connection lifetime: pump the outbox, fan inbound frames
    /// out, and watch for heartbeat silence.
    async fn run_connection(
        &self,
        stream: WsStream,
        outbox_rx: &mut mpsc::Receiver<String>,
    ) -> ConnExit {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnExit::Cancelled;
                }

                outbound = outbox_rx.recv() => {
                    // outbox_tx lives in self, so recv never yields None.
                    if let Some(data) = outbound {
                        if let Err(e) = write.send(Message::Text(data)).await {
                            warn!(label = %self.cfg.label, error = %e, "write error");
                            return ConnExit::Failed;
                        }
                    }
                }

                inbound = tokio::time::timeout(self.cfg.heartbeat_timeout, read.next()) => {
                    match inbound {
                        Err(_) => {
                            warn!(
                                label = %self.cfg.label,
                                timeout_ms = self.cfg.heartbeat_timeout.as_millis() as u64,
                                "heartbeat timeout, redialing"
                            );
                            return ConnExit::Failed;
                        }
                        Ok(None) => {
                            warn!(label = %self.cfg.label, "stream ended");
                            return ConnExit::Failed;
                        }
                        Ok(Some(Err(e))) => {
                            warn!(label = %self.cfg.label, error = %e, "read error, redialing");
                            return ConnExit::Failed;
                        }
                        Ok(Some(Ok(msg))) => match msg {
                            Message::Text(text) => self.fan_out(text.into_bytes()),
                            Message::Binary(data) => self.fan_out(data),
                            Message::Ping(payload) => {
                                if write.send(Message::Pong(payload)).await.is_err() {
                                    return ConnExit::Failed;
                                }
                            }
                            Message::Close(frame) => {
                                debug!(label = %self.cfg.label, frame = ?frame, "server close");
                                return ConnExit::Failed;
                            }
                            _ => {}
                        },
                    }
                }
            }
        }
    }

    /// Redial with exponential backoff until success or cancellation.
    async fn redial(&self) -> Option<WsStream> {
        let mut delay = self.cfg.backoff_initial;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            Metrics::ws_reconnect(&self.cfg.label);
            match dial(&self.cfg).await {
                Ok(stream) => {
                    info!(label = %self.cfg.label, "reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(
                        label = %self.cfg.label,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "reconnect failed"
                    );
                    delay = delay
                        .mul_f64(self.cfg.backoff_factor)
                        .min(self.cfg.backoff_max);
                }
            }
        }
    }

    /// Deliver a frame to every subscriber without blocking.
    fn fan_out(&self, frame: Vec<u8>) {
        let subs = self.subs.read();
        for sub in subs.iter() {
            if sub.try_send(frame.clone()).is_err() {
                Metrics::ws_frame_dropped(&self.cfg.label);
                trace!(label = %self.cfg.label, "dropping frame for slow subscriber");
            }
        }
    }
}

/// Establish the WebSocket connection with Nagle disabled.
async fn dial(cfg: &WsConfig) -> WsResult<WsStream> {
    let mut request = cfg.url.as_str().into_client_request()?;
    for (name, value) in &cfg.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| WsError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| WsError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        request.headers_mut().insert(header_name, header_value);
    }

    let mut ws_cfg = WebSocketConfig::default();
    ws_cfg.write_buffer_size = cfg.write_buffer_size;

    let (stream, _response) =
        connect_async_tls_with_config(request, Some(ws_cfg), true, None).await?;
    Ok(stream)
}
