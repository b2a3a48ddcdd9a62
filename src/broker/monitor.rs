use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::engine::{BrokerError, MessageBroker};
use super::handler::{EnvelopeHandler, HandlerError};
use super::subscription::{EventFilter, SubscriptionHandle};
use crate::envelope::MessageEnvelope;

/// Observe traffic without being able to publish.
#[derive(Clone)]
pub struct Monitor {
    broker: MessageBroker,
}

impl Monitor {
    pub(crate) fn new(broker: MessageBroker) -> Self {
        Self { broker }
    }

    /// Every envelope on `channel`, regardless of event type.
    pub fn watch(
        &self,
        channel: &str,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        self.broker.subscribe(channel, EventFilter::All, handler)
    }

    pub fn unwatch(&self, handle: &SubscriptionHandle) -> bool {
        self.broker.unsubscribe(handle)
    }

    pub fn channels(&self) -> Vec<String> {
        self.broker.channels()
    }
}

/// Logs each envelope at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

#[async_trait]
impl EnvelopeHandler for LogObserver {
    async fn handle(&self, envelope: Arc<MessageEnvelope>) -> Result<(), HandlerError> {
        info!(
            channel = %envelope.channel,
            event_type = %envelope.event_type,
            job_id = %envelope.job_id,
            source_queue = %envelope.source_queue,
            envelope_id = %envelope.id,
            correlation_id = envelope.correlation_id.as_deref().unwrap_or("-"),
            payload = %envelope.payload,
            "envelope observed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log-observer"
    }
}
