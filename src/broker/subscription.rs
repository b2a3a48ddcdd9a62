use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::handler::{EnvelopeHandler, invoke_guarded};
use crate::envelope::{EventType, MessageEnvelope};

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) channel: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Which event types a subscription wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Only(HashSet<EventType>),
}

impl EventFilter {
    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        EventFilter::Only(types.into_iter().collect())
    }

    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(types) => types.contains(event_type),
        }
    }
}

/// One registration: its filter, its queue, and the worker draining it.
///
/// The queue itself is unbounded so the transport receive path never
/// blocks; `capacity` bounds it for `job.progress` only. Progress envelopes
/// arriving while `capacity` or more envelopes are pending are dropped.
/// Every other event type is always queued.
pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) filter: EventFilter,
    handler_name: String,
    capacity: usize,
    pending: Arc<AtomicUsize>,
    sender: mpsc::UnboundedSender<Arc<MessageEnvelope>>,
    active: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn(
        id: u64,
        channel: &str,
        filter: EventFilter,
        handler: Arc<dyn EnvelopeHandler>,
        capacity: usize,
    ) -> Self {
        let (sender, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));
        let handler_name = handler.name().to_string();
        let worker = tokio::spawn(run_worker(
            channel.to_string(),
            handler,
            rx,
            Arc::clone(&pending),
            Arc::clone(&active),
        ));

        Self {
            id,
            filter,
            handler_name,
            capacity: capacity.max(1),
            pending,
            sender,
            active,
            worker,
        }
    }

    /// Queue an envelope without blocking.
    pub(crate) fn offer(&self, envelope: &Arc<MessageEnvelope>) {
        let pending = self.pending.load(Ordering::Acquire);
        if pending >= self.capacity {
            if envelope.event_type == EventType::JobProgress {
                debug!(
                    handler = %self.handler_name,
                    envelope_id = %envelope.id,
                    pending,
                    "subscription queue full, progress envelope dropped"
                );
                return;
            }
            if pending == self.capacity {
                warn!(
                    handler = %self.handler_name,
                    envelope_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "subscription queue over capacity, handler is falling behind"
                );
            }
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Arc::clone(envelope)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Envelopes queued and not yet picked up by the worker.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop delivering. An envelope already being handled runs to
    /// completion; anything still queued is discarded.
    pub(crate) fn cancel(self) -> JoinHandle<()> {
        self.active.store(false, Ordering::Release);
        drop(self.sender);
        self.worker
    }
}

async fn run_worker(
    channel: String,
    handler: Arc<dyn EnvelopeHandler>,
    mut rx: mpsc::UnboundedReceiver<Arc<MessageEnvelope>>,
    pending: Arc<AtomicUsize>,
    active: Arc<AtomicBool>,
) {
    while let Some(envelope) = rx.recv().await {
        pending.fetch_sub(1, Ordering::AcqRel);
        if !active.load(Ordering::Acquire) {
            break;
        }
        if let Err(err) = invoke_guarded(handler.as_ref(), Arc::clone(&envelope)).await {
            error!(
                channel = %channel,
                handler = handler.name(),
                envelope_id = %envelope.id,
                event_type = %envelope.event_type,
                "envelope handler failed: {err}"
            );
        }
    }
    debug!(channel = %channel, handler = handler.name(), "subscription worker stopped");
}
