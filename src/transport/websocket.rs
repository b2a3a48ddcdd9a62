//! WebSocket transport
//!
//! Client side of the relay protocol (see `frame`). Responsibilities:
//! - open the socket and run the `auth` handshake when a token is supplied
//! - keep one background supervisor task per transport that pumps frames
//!   in both directions and reconnects with backoff when the socket drops
//! - replay `subscribe` frames for every registered channel after each
//!   reconnect, so raw subscriptions survive outages transparently
//!
//! Publishing while the socket is down fails fast with `Unacknowledged`;
//! frames are never buffered across a reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::frame::{ClientFrame, RelayFrame};
use super::table::RawSubscriptions;
use super::{
    ChannelTransport, ConnectionHandle, ConnectionState, Credentials, RawCallback,
    RawSubscriptionId, TransportError,
};
use crate::config::TransportSettings;
use crate::policies::Backoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

struct Shared {
    url: String,
    reconnect: Backoff,
    health_failure_threshold: u32,
    health_failures: AtomicU64,
    state: Mutex<ConnectionState>,
    /// Held for the whole of `connect`, so only one socket is ever opened.
    connect_gate: tokio::sync::Mutex<()>,
    credentials: Mutex<Option<Credentials>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    subscriptions: RawSubscriptions,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connection_id: Mutex<Option<String>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, reconnect: Backoff, health_failure_threshold: u32) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                reconnect,
                health_failure_threshold: health_failure_threshold.max(1),
                health_failures: AtomicU64::new(0),
                state: Mutex::new(ConnectionState::Disconnected),
                connect_gate: tokio::sync::Mutex::new(()),
                credentials: Mutex::new(None),
                outbound: Mutex::new(None),
                subscriptions: RawSubscriptions::new(),
                shutdown,
                supervisor: Mutex::new(None),
                connection_id: Mutex::new(None),
            }),
        }
    }

    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new(
            settings.url.clone(),
            Backoff::reconnect(
                Duration::from_millis(settings.reconnect_base_ms),
                Duration::from_millis(settings.reconnect_max_ms),
            ),
            settings.health_failure_threshold,
        )
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Outages that crossed the health-check threshold. Each outage is
    /// counted once, however long it lasts.
    pub fn health_failures(&self) -> u64 {
        self.shared.health_failures.load(Ordering::Acquire)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<ConnectionHandle, TransportError> {
        let shared = &self.shared;
        let _gate = shared.connect_gate.lock().await;
        if shared.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        if let Some(connection_id) = shared.connection_id.lock().clone() {
            return Ok(ConnectionHandle {
                connection_id,
                endpoint: shared.url.clone(),
            });
        }

        shared.set_state(ConnectionState::Connecting);
        let ws = match open_session(&shared.url, credentials).await {
            Ok(ws) => ws,
            Err(err) => {
                shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let connection_id = Uuid::new_v4().to_string();
        *shared.credentials.lock() = Some(credentials.clone());
        *shared.connection_id.lock() = Some(connection_id.clone());
        info!(url = %shared.url, client = %credentials.client_name, "websocket transport connected");

        let shutdown = shared.shutdown.subscribe();
        let outbound = shared.attach();
        let task = tokio::spawn(supervise(Arc::clone(shared), ws, outbound, shutdown));
        *shared.supervisor.lock() = Some(task);

        Ok(ConnectionHandle {
            connection_id,
            endpoint: shared.url.clone(),
        })
    }

    async fn publish_raw(&self, channel: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.shared.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        let data = String::from_utf8(bytes)
            .map_err(|e| TransportError::Protocol(format!("payload is not UTF-8: {e}")))?;
        let frame = ClientFrame::Publish {
            channel: channel.to_string(),
            data,
        };
        if self.shared.send(&frame) {
            Ok(())
        } else {
            Err(TransportError::Unacknowledged)
        }
    }

    fn subscribe_raw(&self, channel: &str, callback: RawCallback) -> RawSubscriptionId {
        let (id, first) = self.shared.subscriptions.insert(channel, callback);
        if first {
            // Not connected is fine: the session replays subscriptions on connect.
            self.shared.send(&ClientFrame::Subscribe {
                channel: channel.to_string(),
            });
        }
        id
    }

    fn unsubscribe_raw(&self, id: RawSubscriptionId) {
        if let Some((channel, true)) = self.shared.subscriptions.remove(id) {
            self.shared.send(&ClientFrame::Unsubscribe { channel });
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn shutdown(&self) {
        self.shared.set_state(ConnectionState::Closed);
        self.shared.shutdown.send_replace(true);

        let task = self.shared.supervisor.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.subscriptions.clear();
        info!(url = %self.shared.url, "websocket transport shut down");
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }

    /// Queue a frame on the live session. `false` when there is none.
    fn send(&self, frame: &ClientFrame) -> bool {
        let msg = match frame.to_ws() {
            Ok(msg) => msg,
            Err(e) => {
                error!("failed to serialize client frame: {e}");
                return false;
            }
        };
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    fn on_text(&self, text: &str) {
        match serde_json::from_str::<RelayFrame>(text) {
            Ok(RelayFrame::Message { channel, data }) => {
                self.subscriptions.deliver(&channel, data.as_bytes());
            }
            Ok(RelayFrame::Error { message }) => {
                warn!(url = %self.url, "relay reported error: {message}");
            }
            Ok(RelayFrame::Authenticated {}) => {}
            Err(err) => {
                warn!(
                    "invalid relay frame: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
            }
        }
    }

    /// Install a fresh outbound queue, replay subscriptions into it and
    /// mark the transport connected. The session drains the returned end.
    fn attach(&self) -> mpsc::UnboundedReceiver<WsMessage> {
        let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();

        // Expose the sender before replaying, so a concurrent subscribe_raw
        // is either replayed here or sent by itself. Duplicates are harmless.
        *self.outbound.lock() = Some(tx);
        for channel in self.subscriptions.channels() {
            self.send(&ClientFrame::Subscribe { channel });
        }
        self.set_state(ConnectionState::Connected);
        rx
    }

    /// Pump frames until the socket drops or shutdown is requested.
    async fn run_session(
        &self,
        ws: WsStream,
        mut rx: mpsc::UnboundedReceiver<WsMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            warn!(url = %self.url, "websocket send failed: {e}");
                            break;
                        }
                    }
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => self.on_text(text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %self.url, "websocket receive failed: {e}");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        *self.outbound.lock() = None;
    }

    /// Reconnect with backoff. `None` once shutdown is requested.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<WsStream> {
        let credentials = self.credentials.lock().clone().unwrap_or_default();
        let mut attempt: u32 = 0;
        let mut health_reported = false;

        loop {
            let delay = self.reconnect.delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return None,
            }
            if *shutdown.borrow() {
                return None;
            }

            self.set_state(ConnectionState::Connecting);
            match open_session(&self.url, &credentials).await {
                Ok(ws) => {
                    info!(url = %self.url, attempts = attempt + 1, "websocket transport reconnected");
                    return Some(ws);
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    self.set_state(ConnectionState::Disconnected);
                    debug!(url = %self.url, attempt, "reconnect failed: {err}");

                    if attempt >= self.health_failure_threshold && !health_reported {
                        error!(
                            url = %self.url,
                            attempts = attempt,
                            "health check failed: channel transport unreachable, still retrying"
                        );
                        self.health_failures.fetch_add(1, Ordering::AcqRel);
                        health_reported = true;
                    }
                }
            }
        }
    }
}

async fn supervise(
    shared: Arc<Shared>,
    first: WsStream,
    outbound: mpsc::UnboundedReceiver<WsMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ws = first;
    let mut outbound = outbound;

    loop {
        shared.run_session(ws, outbound, &mut shutdown).await;
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(ConnectionState::Disconnected);
        warn!(url = %shared.url, "websocket transport lost connection, reconnecting");

        match shared.reconnect(&mut shutdown).await {
            Some(next) => {
                ws = next;
                outbound = shared.attach();
            }
            None => break,
        }
    }
    debug!(url = %shared.url, "websocket supervisor stopped");
}

async fn open_session(url: &str, credentials: &Credentials) -> Result<WsStream, TransportError> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let Some(token) = credentials.token.as_ref() else {
        return Ok(ws);
    };

    let auth = ClientFrame::Auth {
        token: token.clone(),
    }
    .to_ws()
    .map_err(|e| TransportError::Protocol(e.to_string()))?;
    ws.send(auth)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.next())
        .await
        .map_err(|_| TransportError::Connection("auth handshake timed out".to_string()))?;

    match reply {
        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<RelayFrame>(text.as_str()) {
            Ok(RelayFrame::Authenticated {}) => Ok(ws),
            Ok(RelayFrame::Error { message }) => Err(TransportError::Connection(format!(
                "authentication rejected: {message}"
            ))),
            Ok(other) => Err(TransportError::Protocol(format!(
                "unexpected frame during handshake: {other:?}"
            ))),
            Err(e) => Err(TransportError::Protocol(e.to_string())),
        },
        Some(Ok(_)) => Err(TransportError::Protocol(
            "unexpected non-text frame during handshake".to_string(),
        )),
        Some(Err(e)) => Err(TransportError::Connection(e.to_string())),
        None => Err(TransportError::Connection(
            "connection closed during handshake".to_string(),
        )),
    }
}
