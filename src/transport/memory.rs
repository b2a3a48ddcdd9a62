//! In-process channel transport.
//!
//! A `MemoryHub` plays the hosted channel service; every `MemoryTransport`
//! created from it is one connection, so several brokers sharing a hub
//! behave like several processes sharing a realtime service. Publishing
//! fans out synchronously to all connected endpoints, which keeps
//! per-channel order for a single publisher.
//!
//! `disconnect`/`reconnect` simulate outages: while an endpoint is down its
//! publishes are rejected and messages addressed to it are lost, but its
//! raw subscriptions stay registered and resume on reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::table::RawSubscriptions;
use super::{
    ChannelTransport, ConnectionHandle, ConnectionState, Credentials, RawCallback,
    RawSubscriptionId, TransportError,
};

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    required_token: Option<String>,
    endpoints: Mutex<Vec<Weak<Endpoint>>>,
    published: AtomicU64,
}

struct Endpoint {
    id: String,
    state: Mutex<ConnectionState>,
    subscriptions: RawSubscriptions,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub that rejects connections not presenting `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                required_token: Some(token.into()),
                ..HubInner::default()
            }),
        }
    }

    /// Number of messages accepted by the hub so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn attach(&self, endpoint: &Arc<Endpoint>) {
        let mut endpoints = self.inner.endpoints.lock();
        endpoints.retain(|weak| weak.strong_count() > 0);
        endpoints.push(Arc::downgrade(endpoint));
    }

    fn broadcast(&self, channel: &str, bytes: &[u8]) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let endpoints: Vec<Arc<Endpoint>> = self
            .inner
            .endpoints
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        endpoints
            .iter()
            .filter(|endpoint| *endpoint.state.lock() == ConnectionState::Connected)
            .map(|endpoint| endpoint.subscriptions.deliver(channel, bytes))
            .sum()
    }
}

pub struct MemoryTransport {
    hub: MemoryHub,
    endpoint: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn new(hub: &MemoryHub) -> Self {
        let endpoint = Arc::new(Endpoint {
            id: Uuid::new_v4().to_string(),
            state: Mutex::new(ConnectionState::Disconnected),
            subscriptions: RawSubscriptions::new(),
        });
        hub.attach(&endpoint);
        Self {
            hub: hub.clone(),
            endpoint,
        }
    }

    /// Drop the connection as if the network went away.
    pub fn disconnect(&self) {
        let mut state = self.endpoint.state.lock();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Disconnected;
            info!(endpoint = %self.endpoint.id, "memory transport disconnected");
        }
    }

    /// Restore a dropped connection; existing subscriptions resume.
    pub fn reconnect(&self) {
        let mut state = self.endpoint.state.lock();
        if *state == ConnectionState::Disconnected {
            *state = ConnectionState::Connected;
            info!(endpoint = %self.endpoint.id, "memory transport reconnected");
        }
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<ConnectionHandle, TransportError> {
        if let Some(required) = &self.hub.inner.required_token {
            if credentials.token.as_deref() != Some(required.as_str()) {
                return Err(TransportError::Connection(format!(
                    "invalid credentials for {}",
                    credentials.client_name
                )));
            }
        }

        let mut state = self.endpoint.state.lock();
        if *state == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        *state = ConnectionState::Connected;
        debug!(endpoint = %self.endpoint.id, client = %credentials.client_name, "memory transport connected");

        Ok(ConnectionHandle {
            connection_id: self.endpoint.id.clone(),
            endpoint: "memory".to_string(),
        })
    }

    async fn publish_raw(&self, channel: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        match *self.endpoint.state.lock() {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::Unacknowledged),
        }
        self.hub.broadcast(channel, &bytes);
        Ok(())
    }

    fn subscribe_raw(&self, channel: &str, callback: RawCallback) -> RawSubscriptionId {
        self.endpoint.subscriptions.insert(channel, callback).0
    }

    fn unsubscribe_raw(&self, id: RawSubscriptionId) {
        self.endpoint.subscriptions.remove(id);
    }

    fn state(&self) -> ConnectionState {
        *self.endpoint.state.lock()
    }

    async fn shutdown(&self) {
        *self.endpoint.state.lock() = ConnectionState::Closed;
        self.endpoint.subscriptions.clear();
    }
}
