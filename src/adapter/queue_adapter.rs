use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::binding::{QueueAddress, QueueBinding, QueueJob};
use super::dedup::{DedupStore, MemoryDedup};
use crate::broker::{
    BrokerError, EnvelopeHandler, EventFilter, HandlerError, MessageBroker, PublishError,
    SubscriptionHandle,
};
use crate::config::AdapterSettings;
use crate::envelope::{EventType, MessageEnvelope};
use crate::policies::Backoff;
use crate::registry::EventHandlerRegistry;

/// What happened to one lifecycle notification. Queues are free to ignore
/// it; nothing about the job depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Published,
    /// Not sent, and not going to be retried.
    Dropped,
    /// Every attempt failed.
    GaveUp { attempts: u32 },
}

/// A terminal event being delivered in the background.
///
/// Dropping it detaches the delivery; awaiting `wait` yields the outcome.
#[derive(Debug)]
pub struct TerminalDelivery {
    envelope_id: String,
    task: JoinHandle<DeliveryOutcome>,
}

impl TerminalDelivery {
    pub fn envelope_id(&self) -> &str {
        &self.envelope_id
    }

    pub async fn wait(self) -> DeliveryOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(envelope_id = %self.envelope_id, "terminal delivery task failed: {err}");
                DeliveryOutcome::Dropped
            }
        }
    }
}

struct RemoteChannel {
    registry: Arc<EventHandlerRegistry>,
    subscription: SubscriptionHandle,
}

/// Bridges one job queue to the broker.
///
/// The lifecycle hooks never fail and never wait on the network longer
/// than one publish; terminal events are retried in the background.
pub struct QueueAdapter<J> {
    binding: QueueBinding<J>,
    broker: MessageBroker,
    retry: Backoff,
    retry_attempts: u32,
    dedup: Arc<dyn DedupStore>,
    remotes: Mutex<HashMap<String, RemoteChannel>>,
}

impl<J: QueueJob + 'static> QueueAdapter<J> {
    pub fn new(binding: QueueBinding<J>, broker: MessageBroker, settings: &AdapterSettings) -> Self {
        let dedup = Arc::new(MemoryDedup::new(
            settings.dedup_capacity,
            Duration::from_secs(settings.dedup_ttl_secs),
        ));
        Self::with_dedup_store(binding, broker, settings, dedup)
    }

    pub fn with_dedup_store(
        binding: QueueBinding<J>,
        broker: MessageBroker,
        settings: &AdapterSettings,
        dedup: Arc<dyn DedupStore>,
    ) -> Self {
        Self {
            binding,
            broker,
            retry: Backoff::terminal_retry(Duration::from_millis(settings.terminal_retry_base_ms)),
            retry_attempts: settings.terminal_retry_attempts,
            dedup,
            remotes: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &QueueAddress {
        self.binding.address()
    }

    pub async fn on_job_created(&self, job: &J) -> DeliveryOutcome {
        let envelope = self.binding.created_envelope(job);
        match self.broker.publish(&envelope).await {
            Ok(()) => DeliveryOutcome::Published,
            Err(err) => {
                warn!(
                    queue = %self.binding.source_queue(),
                    job_id = %envelope.job_id,
                    envelope_id = %envelope.id,
                    "job.created not published: {err}"
                );
                DeliveryOutcome::Dropped
            }
        }
    }

    /// Best effort: a failed publish is dropped without retry.
    pub async fn on_job_progress(&self, job: &J, percent: u8, detail: &str) -> DeliveryOutcome {
        let envelope = self.binding.progress_envelope(job, percent, detail);
        match self.broker.publish(&envelope).await {
            Ok(()) => DeliveryOutcome::Published,
            Err(err) => {
                debug!(
                    queue = %self.binding.source_queue(),
                    job_id = %envelope.job_id,
                    "job.progress dropped: {err}"
                );
                DeliveryOutcome::Dropped
            }
        }
    }

    pub fn on_job_completed(&self, job: &J, result: &Value) -> TerminalDelivery {
        self.deliver_terminal(self.binding.completed_envelope(job, result))
    }

    pub fn on_job_failed(&self, job: &J, error: &str) -> TerminalDelivery {
        self.deliver_terminal(self.binding.failed_envelope(job, error))
    }

    fn deliver_terminal(&self, envelope: MessageEnvelope) -> TerminalDelivery {
        let envelope_id = envelope.id.clone();
        let task = tokio::spawn(publish_with_retry(
            self.broker.clone(),
            envelope,
            self.retry,
            self.retry_attempts,
        ));
        TerminalDelivery { envelope_id, task }
    }

    /// React to `event_type` envelopes published by the `remote` queue.
    ///
    /// `action` runs at most once per envelope id, and at most once per
    /// remote job for `job.created`/`job.completed`/`job.failed`, within the
    /// dedup retention window. A failed action is not recorded, so a
    /// redelivery gets another chance.
    pub fn register_coordination_handler<F, Fut>(
        &self,
        remote: &QueueAddress,
        event_type: EventType,
        action: F,
    ) -> Result<(), BrokerError>
    where
        F: Fn(Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let mut remotes = self.remotes.lock();
        let registry = match remotes.get(&remote.channel) {
            Some(existing) => Arc::clone(&existing.registry),
            None => {
                let registry = Arc::new(EventHandlerRegistry::new(format!(
                    "{}<-{}",
                    self.binding.source_queue(),
                    remote.channel
                )));
                let subscription = self.broker.subscribe(
                    &remote.channel,
                    EventFilter::All,
                    registry.clone(),
                )?;
                remotes.insert(
                    remote.channel.clone(),
                    RemoteChannel {
                        registry: Arc::clone(&registry),
                        subscription,
                    },
                );
                registry
            }
        };

        // stable across restarts as long as registration order is
        let scope = format!(
            "{}|{}|{}|{}",
            self.binding.source_queue(),
            remote.source_queue,
            event_type,
            registry.handler_count(&event_type)
        );
        info!(
            queue = %self.binding.source_queue(),
            remote_queue = %remote.source_queue,
            channel = %remote.channel,
            event_type = %event_type,
            "coordination handler registered"
        );
        registry.register(
            event_type,
            Arc::new(CoordinationHandler {
                name: scope.clone(),
                scope,
                source_queue: remote.source_queue.clone(),
                dedup: Arc::clone(&self.dedup),
                action,
            }),
        );
        Ok(())
    }

    /// Drop every coordination subscription. Hooks keep working.
    pub fn close(&self) {
        let remotes: Vec<RemoteChannel> = self.remotes.lock().drain().map(|(_, r)| r).collect();
        for remote in remotes {
            self.broker.unsubscribe(&remote.subscription);
        }
    }
}

async fn publish_with_retry(
    broker: MessageBroker,
    envelope: MessageEnvelope,
    retry: Backoff,
    retries: u32,
) -> DeliveryOutcome {
    let mut attempt = 0;
    loop {
        let err = match broker.publish(&envelope).await {
            Ok(()) => return DeliveryOutcome::Published,
            Err(err @ (PublishError::Closed | PublishError::Encode(_))) => {
                warn!(
                    envelope_id = %envelope.id,
                    job_id = %envelope.job_id,
                    event_type = %envelope.event_type,
                    "terminal event dropped: {err}"
                );
                return DeliveryOutcome::Dropped;
            }
            Err(err) => err,
        };

        if attempt >= retries {
            warn!(
                envelope_id = %envelope.id,
                job_id = %envelope.job_id,
                source_queue = %envelope.source_queue,
                event_type = %envelope.event_type,
                attempts = attempt + 1,
                "giving up on terminal event delivery: {err}"
            );
            return DeliveryOutcome::GaveUp {
                attempts: attempt + 1,
            };
        }

        let delay = retry.delay(attempt);
        debug!(
            envelope_id = %envelope.id,
            attempt = attempt + 1,
            ?delay,
            "terminal event publish failed, retrying: {err}"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

struct CoordinationHandler<F> {
    name: String,
    scope: String,
    source_queue: String,
    dedup: Arc<dyn DedupStore>,
    action: F,
}

impl<F> CoordinationHandler<F> {
    fn dedup_keys(&self, envelope: &MessageEnvelope) -> Vec<String> {
        let mut keys = vec![format!("{}|id|{}", self.scope, envelope.id)];
        if envelope.event_type.is_once_per_job() {
            keys.push(format!(
                "{}|job|{}|{}|{}",
                self.scope, envelope.source_queue, envelope.job_id, envelope.event_type
            ));
        }
        keys
    }

    fn already_handled(&self, keys: &[String]) -> bool {
        keys.iter().any(|key| match self.dedup.seen(key) {
            Ok(seen) => seen,
            Err(err) => {
                // an unavailable ledger must not stall coordination
                warn!(handler = %self.name, key = %key, "dedup lookup failed: {err}");
                false
            }
        })
    }
}

#[async_trait]
impl<F, Fut> EnvelopeHandler for CoordinationHandler<F>
where
    F: Fn(Arc<MessageEnvelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, envelope: Arc<MessageEnvelope>) -> Result<(), HandlerError> {
        if envelope.source_queue != self.source_queue {
            return Ok(());
        }

        let keys = self.dedup_keys(&envelope);
        if self.already_handled(&keys) {
            debug!(
                handler = %self.name,
                envelope_id = %envelope.id,
                job_id = %envelope.job_id,
                "duplicate delivery skipped"
            );
            return Ok(());
        }

        (self.action)(Arc::clone(&envelope)).await?;

        for key in &keys {
            if let Err(err) = self.dedup.mark(key) {
                warn!(handler = %self.name, key = %key, "dedup record failed: {err}");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
