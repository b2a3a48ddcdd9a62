use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::handler::EnvelopeHandler;
use super::subscription::{EventFilter, Subscription, SubscriptionHandle};
use crate::config::BrokerSettings;
use crate::envelope::{self, CodecError, MessageEnvelope};
use crate::transport::{
    ChannelTransport, ConnectionHandle, ConnectionState, Credentials, RawCallback,
    RawSubscriptionId, TransportError,
};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport is down; envelope {envelope_id} was not sent")]
    TransportDown { envelope_id: String },

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] CodecError),

    #[error("broker has been shut down")]
    Closed,

    #[error(transparent)]
    Transport(TransportError),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker has been shut down")]
    Closed,

    #[error(transparent)]
    Connection(#[from] TransportError),
}

/// Cheap to clone; all clones share one subscription table and transport.
#[derive(Clone)]
pub struct MessageBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    transport: Arc<dyn ChannelTransport>,
    settings: BrokerSettings,
    // Read on every dispatch, written only by subscribe/unsubscribe.
    routes: RwLock<HashMap<String, ChannelRoute>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// One raw transport subscription per channel, shared by every broker
/// subscription on it.
struct ChannelRoute {
    raw_id: RawSubscriptionId,
    subscriptions: Vec<Subscription>,
}

impl MessageBroker {
    pub fn new(transport: Arc<dyn ChannelTransport>, settings: BrokerSettings) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                transport,
                settings,
                routes: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect the underlying transport. One attempt; on `Err` the caller
    /// retries with its own backoff.
    pub async fn start(&self, credentials: &Credentials) -> Result<ConnectionHandle, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let handle = self.inner.transport.connect(credentials).await?;
        info!(
            connection_id = %handle.connection_id,
            endpoint = %handle.endpoint,
            "message broker connected"
        );
        Ok(handle)
    }

    /// Encode and send. Never retries: only the caller knows whether the
    /// event is safe to send again.
    pub async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        let bytes = envelope::encode(envelope)?;
        self.inner
            .transport
            .publish_raw(&envelope.channel, bytes)
            .await
            .map_err(|err| match err {
                TransportError::Unacknowledged | TransportError::Connection(_) => {
                    PublishError::TransportDown {
                        envelope_id: envelope.id.clone(),
                    }
                }
                TransportError::Closed => PublishError::Closed,
                other => PublishError::Transport(other),
            })
    }

    /// Register `handler` for envelopes on `channel` matching `filter`.
    ///
    /// Must be called from within a tokio runtime: each subscription gets
    /// its own worker task.
    pub fn subscribe(
        &self,
        channel: &str,
        filter: EventFilter,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler_name = handler.name().to_string();
        let subscription = Subscription::spawn(
            id,
            channel,
            filter,
            handler,
            self.inner.settings.subscription_queue_capacity,
        );

        let mut routes = self.inner.routes.write();
        match routes.get_mut(channel) {
            Some(route) => route.subscriptions.push(subscription),
            None => {
                let raw_id = self
                    .inner
                    .transport
                    .subscribe_raw(channel, raw_callback(&self.inner, channel));
                routes.insert(
                    channel.to_string(),
                    ChannelRoute {
                        raw_id,
                        subscriptions: vec![subscription],
                    },
                );
            }
        }
        debug!(channel, subscription_id = id, handler = %handler_name, "subscribed");

        Ok(SubscriptionHandle {
            id,
            channel: channel.to_string(),
        })
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let (subscription, released) = {
            let mut routes = self.inner.routes.write();
            let Some(route) = routes.get_mut(&handle.channel) else {
                return false;
            };
            let Some(pos) = route.subscriptions.iter().position(|s| s.id == handle.id) else {
                return false;
            };
            let subscription = route.subscriptions.remove(pos);
            let released = if route.subscriptions.is_empty() {
                routes.remove(&handle.channel).map(|route| route.raw_id)
            } else {
                None
            };
            (subscription, released)
        };

        if let Some(raw_id) = released {
            self.inner.transport.unsubscribe_raw(raw_id);
        }
        // detach: the worker finishes its current envelope on its own
        drop(subscription.cancel());
        debug!(channel = %handle.channel, subscription_id = handle.id, "unsubscribed");
        true
    }

    /// Read-only view for dashboards and other observers.
    pub fn monitor(&self) -> super::Monitor {
        super::Monitor::new(self.clone())
    }

    /// Cancel every subscription, wait for their workers, and shut the
    /// transport down. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let routes: Vec<ChannelRoute> = self.inner.routes.write().drain().map(|(_, r)| r).collect();
        let mut workers = Vec::new();
        for route in routes {
            self.inner.transport.unsubscribe_raw(route.raw_id);
            workers.extend(route.subscriptions.into_iter().map(Subscription::cancel));
        }
        for worker in workers {
            let _ = worker.await;
        }

        self.inner.transport.shutdown().await;
        info!("message broker shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .routes
            .read()
            .values()
            .map(|route| route.subscriptions.len())
            .sum()
    }

    /// Envelopes waiting in one subscription's queue; `None` once it is
    /// unsubscribed.
    pub fn queued(&self, handle: &SubscriptionHandle) -> Option<usize> {
        self.inner
            .routes
            .read()
            .get(&handle.channel)?
            .subscriptions
            .iter()
            .find(|s| s.id == handle.id)
            .map(Subscription::pending)
    }

    pub fn channels(&self) -> Vec<String> {
        self.inner.routes.read().keys().cloned().collect()
    }
}

fn raw_callback(inner: &Arc<BrokerInner>, channel: &str) -> RawCallback {
    let weak: Weak<BrokerInner> = Arc::downgrade(inner);
    let channel = channel.to_string();
    Arc::new(move |bytes: &[u8]| {
        if let Some(inner) = weak.upgrade() {
            inner.dispatch(&channel, bytes);
        }
    })
}

impl BrokerInner {
    /// Decode once, then queue for every matching subscription.
    fn dispatch(&self, channel: &str, bytes: &[u8]) {
        let envelope = match envelope::decode(bytes) {
            Ok(envelope) => Arc::new(envelope),
            Err(err) => {
                warn!(
                    channel,
                    raw = %String::from_utf8_lossy(bytes),
                    "dropping malformed envelope: {err}"
                );
                return;
            }
        };

        let routes = self.routes.read();
        let Some(route) = routes.get(channel) else {
            return;
        };
        for subscription in &route.subscriptions {
            if subscription.filter.matches(&envelope.event_type) {
                subscription.offer(&envelope);
            }
        }
    }
}
