//! A relay channel holds the ids of the clients subscribed to it.
//! Duplicate subscriptions are a no-op.

use std::collections::HashSet;

pub type ClientId = String;

/// One named channel and the clients currently subscribed to it.
#[derive(Debug, Default)]
pub struct Channel {
    pub name: String,
    pub subscribers: HashSet<ClientId>,
}

impl Channel {
    /// A channel with no subscribers yet.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber; subscribing twice is a no-op.
    pub fn subscribe(&mut self, id: ClientId) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber if present.
    pub fn unsubscribe(&mut self, id: &ClientId) {
        self.subscribers.remove(id);
    }

    /// True once the last subscriber has left.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
