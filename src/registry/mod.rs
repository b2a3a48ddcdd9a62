//! Event handler registry
//!
//! Per-consumer lookup from `eventType` to handlers. Queue adapters use one
//! per remote channel; anything else that wants to react to broker traffic
//! (a dashboard notifier, say) can subscribe one directly since the
//! registry is itself an `EnvelopeHandler`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::broker::{EnvelopeHandler, HandlerError, invoke_guarded};
use crate::envelope::{EventType, MessageEnvelope};

/// What one `dispatch` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

pub struct EventHandlerRegistry {
    name: String,
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EnvelopeHandler>>>>,
}

impl EventHandlerRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Add a handler. Safe to call while the registry is already receiving
    /// envelopes; the handler sees envelopes dispatched after it was added.
    pub fn register(&self, event_type: EventType, handler: Arc<dyn EnvelopeHandler>) {
        debug!(
            registry = %self.name,
            event_type = %event_type,
            handler = handler.name(),
            "handler registered"
        );
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, event_type: &EventType) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().values().all(Vec::is_empty)
    }

    /// Run every handler registered for the envelope's type, in
    /// registration order. A failing or panicking handler is logged and the
    /// rest still run.
    pub async fn dispatch(&self, envelope: Arc<MessageEnvelope>) -> DispatchReport {
        // snapshot: the lock must not be held across handler awaits
        let handlers: Vec<Arc<dyn EnvelopeHandler>> = match self.handlers.read().get(&envelope.event_type) {
            Some(handlers) => handlers.clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for handler in handlers {
            report.invoked += 1;
            if let Err(err) = invoke_guarded(handler.as_ref(), Arc::clone(&envelope)).await {
                report.failed += 1;
                error!(
                    registry = %self.name,
                    handler = handler.name(),
                    envelope_id = %envelope.id,
                    event_type = %envelope.event_type,
                    job_id = %envelope.job_id,
                    "handler failed: {err}"
                );
            }
        }
        report
    }
}

#[async_trait]
impl EnvelopeHandler for EventHandlerRegistry {
    async fn handle(&self, envelope: Arc<MessageEnvelope>) -> Result<(), HandlerError> {
        // failures are already logged per handler
        self.dispatch(envelope).await;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
