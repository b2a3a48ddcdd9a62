//! Relay WebSocket server
//!
//! Accepts connections, registers a `Client` per socket, and translates
//! `ClientFrame`s into relay operations. Clients must authenticate before
//! anything else when the relay has a JWT secret; with no secret every
//! client starts out authenticated (and `auth` frames are simply answered).
//!
//! `RelayServer::spawn` returns a `RelayHandle`; shutting the handle down
//! stops accepting and closes every open connection, which is what clients
//! observe as an outage.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::RelayError;
use super::auth::verify_token;
use super::channel::ClientId;
use super::client::Client;
use super::engine::Relay;
use crate::config::RelaySettings;
use crate::transport::frame::{ClientFrame, RelayFrame};

pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<Mutex<Relay>>,
    secret: Option<Arc<str>>,
}

pub struct RelayHandle {
    local_addr: SocketAddr,
    relay: Arc<Mutex<Relay>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayServer {
    pub async fn bind(settings: &RelaySettings) -> Result<Self, RelayError> {
        let addr = format!("{}:{}", settings.host, settings.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self {
            listener,
            relay: Arc::new(Mutex::new(Relay::new())),
            secret: settings.jwt_secret.as_deref().map(Arc::from),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> Result<RelayHandle, RelayError> {
        let local_addr = self.local_addr()?;
        let relay = self.relay.clone();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.serve(rx));
        Ok(RelayHandle {
            local_addr,
            relay,
            shutdown,
            task,
        })
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let addr = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!("relay listening on ws://{addr}");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("relay accepted connection from {peer}");
                        tokio::spawn(handle_connection(
                            stream,
                            self.relay.clone(),
                            self.secret.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("relay accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("relay on ws://{addr} stopped");
    }
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn connected_clients(&self) -> usize {
        self.relay.lock().clients.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.relay
            .lock()
            .channels
            .get(channel)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Stop accepting and drop every open connection.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        let _ = self.task.await;
    }

    /// Resolves when the accept loop exits.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

enum Flow {
    Continue,
    Disconnect,
}

async fn handle_connection(
    stream: TcpStream,
    relay: Arc<Mutex<Relay>>,
    secret: Option<Arc<str>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let client = Client::new(tx, secret.is_none());
    let client_id = client.id.clone();
    relay.lock().register_client(client);

    // Ends once the relay drops this client's sender, after flushing
    // whatever was queued (e.g. a final error frame).
    let writer = {
        let client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("failed to send to {client_id}: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        })
    };

    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(msg)) if msg.is_text() => {
                        let Ok(text) = msg.to_text() else { continue };
                        if let Flow::Disconnect = handle_frame(&relay, &client_id, text, secret.as_deref()) {
                            break;
                        }
                    }
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("{client_id} receive error: {e}");
                        break;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    }

    relay.lock().cleanup_client(&client_id);
    let _ = writer.await;
    debug!("{client_id} disconnected");
}

fn handle_frame(
    relay: &Mutex<Relay>,
    client_id: &ClientId,
    text: &str,
    secret: Option<&str>,
) -> Flow {
    let mut relay = relay.lock();
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(
                "invalid client frame from {client_id}: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            return Flow::Continue;
        }
    };

    let Some(client) = relay.clients.get_mut(client_id) else {
        return Flow::Disconnect;
    };

    match frame {
        ClientFrame::Auth { token } => {
            let accepted = match secret {
                None => true,
                Some(secret) => verify_token(secret, &token).is_ok(),
            };
            if accepted {
                client.authenticated = true;
                debug!("{client_id} authenticated");
                reply(client, &RelayFrame::Authenticated {});
                Flow::Continue
            } else {
                warn!("{client_id} authentication failed");
                reply(
                    client,
                    &RelayFrame::Error {
                        message: "authentication failed".to_string(),
                    },
                );
                Flow::Disconnect
            }
        }
        _ if !client.authenticated => {
            warn!("{client_id} sent a frame before authenticating");
            reply(
                client,
                &RelayFrame::Error {
                    message: "must authenticate first".to_string(),
                },
            );
            Flow::Disconnect
        }
        ClientFrame::Subscribe { channel } => {
            relay.subscribe(&channel, client_id.clone());
            debug!("{client_id} subscribed to {channel}");
            Flow::Continue
        }
        ClientFrame::Unsubscribe { channel } => {
            relay.unsubscribe(&channel, client_id);
            debug!("{client_id} unsubscribed from {channel}");
            Flow::Continue
        }
        ClientFrame::Publish { channel, data } => {
            let delivered = relay.publish(&channel, data);
            debug!("{client_id} published to {channel} ({delivered} subscribers)");
            Flow::Continue
        }
    }
}

fn reply(client: &Client, frame: &RelayFrame) {
    match frame.to_ws() {
        Ok(msg) => {
            let _ = client.sender.send(msg);
        }
        Err(e) => warn!("failed to serialize reply for {}: {e}", client.id),
    }
}
