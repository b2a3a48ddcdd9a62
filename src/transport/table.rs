//! Raw subscription bookkeeping shared by the transport implementations.
//!
//! Callbacks are cloned out of the table before they run, so a callback may
//! subscribe or unsubscribe without deadlocking the receive path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{RawCallback, RawSubscriptionId};

#[derive(Default)]
pub struct RawSubscriptions {
    next_id: AtomicU64,
    by_channel: RwLock<HashMap<String, Vec<(RawSubscriptionId, RawCallback)>>>,
}

impl RawSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new id and whether it is the first subscription on `channel`.
    pub fn insert(&self, channel: &str, callback: RawCallback) -> (RawSubscriptionId, bool) {
        let id = RawSubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut by_channel = self.by_channel.write();
        let entries = by_channel.entry(channel.to_string()).or_default();
        entries.push((id, callback));
        (id, entries.len() == 1)
    }

    /// Returns the channel the id belonged to and whether it was the last
    /// subscription there. `None` when the id is unknown.
    pub fn remove(&self, id: RawSubscriptionId) -> Option<(String, bool)> {
        let mut by_channel = self.by_channel.write();
        let channel = by_channel
            .iter()
            .find(|(_, entries)| entries.iter().any(|(sub_id, _)| *sub_id == id))
            .map(|(channel, _)| channel.clone())?;

        let now_empty = match by_channel.get_mut(&channel) {
            Some(entries) => {
                entries.retain(|(sub_id, _)| *sub_id != id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            by_channel.remove(&channel);
        }
        Some((channel, now_empty))
    }

    /// Invoke every callback registered on `channel`, in registration order.
    /// Returns how many ran.
    pub fn deliver(&self, channel: &str, bytes: &[u8]) -> usize {
        let callbacks: Vec<RawCallback> = self
            .by_channel
            .read()
            .get(channel)
            .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            callback(bytes);
        }
        callbacks.len()
    }

    pub fn channels(&self) -> Vec<String> {
        self.by_channel.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_channel.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.read().is_empty()
    }

    pub fn clear(&self) {
        self.by_channel.write().clear();
    }
}
