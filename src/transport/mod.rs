//! Channel transport
//!
//! The transport moves opaque byte payloads to every currently-connected
//! subscriber of a named channel. It knows nothing about envelopes.
//!
//! Contract shared by all implementations:
//! - `publish_raw` returns `TransportError::Unacknowledged` while the
//!   connection is down. Nothing is queued for later; retry or buffering is
//!   the caller's job.
//! - callbacks registered with `subscribe_raw` survive reconnects; the
//!   transport re-establishes them by itself.
//! - delivery order is preserved per channel per connection only.
//!
//! Two implementations ship with the crate: `MemoryTransport` (in-process
//! hub, used in tests and single-process deployments) and
//! `WebSocketTransport` (client for the channel relay in `crate::relay`).

pub mod frame;
pub mod memory;
mod table;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryHub, MemoryTransport};
pub use table::RawSubscriptions;
pub use websocket::WebSocketTransport;

/// Invoked once per received message per raw subscription.
///
/// Runs on the transport's receive path, so it must not block.
pub type RawCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawSubscriptionId(pub(crate) u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token presented to the channel service, if it requires one.
    pub token: Option<String>,
    /// Free-form name used in logs on both ends.
    pub client_name: String,
}

impl Credentials {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            token: None,
            client_name: client_name.into(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub connection_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down for good; no reconnects.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish not acknowledged: transport is disconnected")]
    Unacknowledged,

    #[error("transport has been shut down")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    /// Establish the connection. One attempt; the caller owns retry policy
    /// for the initial connect. Reconnects after that are automatic.
    async fn connect(&self, credentials: &Credentials) -> Result<ConnectionHandle, TransportError>;

    async fn publish_raw(&self, channel: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe_raw(&self, channel: &str, callback: RawCallback) -> RawSubscriptionId;

    /// Idempotent.
    fn unsubscribe_raw(&self, id: RawSubscriptionId);

    fn state(&self) -> ConnectionState;

    async fn shutdown(&self);
}

#[cfg(test)]
mod tests;
