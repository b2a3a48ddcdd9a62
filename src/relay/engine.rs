//! Relay engine
//!
//! In-memory routing table for the relay: channels, their subscribers, and
//! the outbound queue of every connected client.
//!
//! The API is synchronous and meant to sit behind a lock
//! (`Arc<Mutex<Relay>>`) owned by the server. Sending only pushes onto
//! unbounded per-client queues, so the lock is never held across network
//! I/O.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use super::channel::{Channel, ClientId};
use super::client::Client;
use crate::transport::frame::RelayFrame;

/// Routing state of one relay: channel name to subscribers, and client id
/// to the client's outbound queue.
#[derive(Debug, Default)]
pub struct Relay {
    pub channels: HashMap<String, Channel>,
    pub clients: HashMap<ClientId, Client>,
}

impl Relay {
    /// An empty relay with no channels and no clients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected client so publishes can reach it.
    /// Re-registering an id replaces the previous client.
    pub fn register_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Forget a client's outbound queue. Its subscriptions are left in
    /// place; use `cleanup_client` on disconnect.
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }

    /// Subscribe a client, creating the channel on first use.
    pub fn subscribe(&mut self, channel: &str, subscriber: ClientId) {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new(channel))
            .subscribe(subscriber);
    }

    /// Unsubscribe a client. Unknown channels are ignored, and channels left
    /// without subscribers are dropped; they have no other state.
    pub fn unsubscribe(&mut self, channel: &str, subscriber: &ClientId) {
        if let Some(c) = self.channels.get_mut(channel) {
            c.unsubscribe(subscriber);
            if c.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Fan `data` out to every subscriber of `channel`. Returns the number of
    /// clients the frame was queued for; zero when nobody listens.
    /// Nothing is stored for later subscribers.
    pub fn publish(&self, channel: &str, data: String) -> usize {
        let Some(target) = self.channels.get(channel) else {
            debug!("no subscribers on channel '{channel}'");
            return 0;
        };

        let frame = RelayFrame::Message {
            channel: channel.to_string(),
            data,
        };
        let ws_msg = match frame.to_ws() {
            Ok(msg) => msg,
            Err(e) => {
                error!("failed to serialize relay frame: {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        for sub_id in &target.subscribers {
            match self.clients.get(sub_id) {
                Some(client) => {
                    if let Err(e) = client.sender.send(ws_msg.clone()) {
                        warn!("failed to queue message for {sub_id}: {e}");
                    } else {
                        delivered += 1;
                    }
                }
                None => warn!("no client registered with id: {sub_id}"),
            }
        }
        delivered
    }

    /// Remove a client and all of its subscriptions, dropping channels
    /// that end up empty. Called when a connection closes.
    pub fn cleanup_client(&mut self, client_id: &ClientId) {
        self.remove_client(client_id);
        for channel in self.channels.values_mut() {
            channel.unsubscribe(client_id);
        }
        self.channels.retain(|_, channel| !channel.is_empty());
        debug!("cleaned up client {client_id}");
    }
}
