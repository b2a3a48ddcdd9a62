use std::sync::Arc;

use serde_json::{Value, json};

use crate::envelope::{EventType, MessageEnvelope};

/// Implemented by the host queue's job type. The adapter needs nothing
/// else from it.
pub trait QueueJob: Send + Sync {
    fn job_id(&self) -> String;

    /// Id of the envelope that caused this job to be enqueued, if any.
    fn correlation_id(&self) -> Option<String> {
        None
    }
}

/// A queue as seen from the outside: its name as it appears in
/// `sourceQueue` and the channel it publishes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAddress {
    pub source_queue: String,
    pub channel: String,
}

impl QueueAddress {
    pub fn new(source_queue: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            source_queue: source_queue.into(),
            channel: channel.into(),
        }
    }
}

type CreatedFn<J> = Arc<dyn Fn(&J) -> Value + Send + Sync>;
type ProgressFn<J> = Arc<dyn Fn(&J, u8, &str) -> Value + Send + Sync>;
type CompletedFn<J> = Arc<dyn Fn(&J, &Value) -> Value + Send + Sync>;
type FailedFn<J> = Arc<dyn Fn(&J, &str) -> Value + Send + Sync>;

/// How one queue's lifecycle maps onto envelopes. Immutable once built.
pub struct QueueBinding<J> {
    address: QueueAddress,
    created: CreatedFn<J>,
    progress: ProgressFn<J>,
    completed: CompletedFn<J>,
    failed: FailedFn<J>,
}

impl<J: QueueJob> QueueBinding<J> {
    pub fn builder(
        source_queue: impl Into<String>,
        channel: impl Into<String>,
    ) -> QueueBindingBuilder<J> {
        QueueBindingBuilder {
            address: QueueAddress::new(source_queue, channel),
            created: None,
            progress: None,
            completed: None,
            failed: None,
        }
    }

    pub fn address(&self) -> &QueueAddress {
        &self.address
    }

    pub fn source_queue(&self) -> &str {
        &self.address.source_queue
    }

    pub fn channel(&self) -> &str {
        &self.address.channel
    }

    pub fn created_envelope(&self, job: &J) -> MessageEnvelope {
        self.envelope(job, EventType::JobCreated, (self.created)(job))
    }

    /// `percent` is clamped to 100.
    pub fn progress_envelope(&self, job: &J, percent: u8, detail: &str) -> MessageEnvelope {
        self.envelope(
            job,
            EventType::JobProgress,
            (self.progress)(job, percent.min(100), detail),
        )
    }

    pub fn completed_envelope(&self, job: &J, result: &Value) -> MessageEnvelope {
        self.envelope(job, EventType::JobCompleted, (self.completed)(job, result))
    }

    pub fn failed_envelope(&self, job: &J, error: &str) -> MessageEnvelope {
        self.envelope(job, EventType::JobFailed, (self.failed)(job, error))
    }

    fn envelope(&self, job: &J, event_type: EventType, payload: Value) -> MessageEnvelope {
        let envelope = MessageEnvelope::new(
            self.address.channel.clone(),
            event_type,
            job.job_id(),
            self.address.source_queue.clone(),
            payload,
        );
        match job.correlation_id() {
            Some(correlation_id) => envelope.with_correlation_id(correlation_id),
            None => envelope,
        }
    }
}

pub struct QueueBindingBuilder<J> {
    address: QueueAddress,
    created: Option<CreatedFn<J>>,
    progress: Option<ProgressFn<J>>,
    completed: Option<CompletedFn<J>>,
    failed: Option<FailedFn<J>>,
}

impl<J: QueueJob + 'static> QueueBindingBuilder<J> {
    pub fn on_created<F>(mut self, f: F) -> Self
    where
        F: Fn(&J) -> Value + Send + Sync + 'static,
    {
        self.created = Some(Arc::new(f));
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&J, u8, &str) -> Value + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    pub fn on_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&J, &Value) -> Value + Send + Sync + 'static,
    {
        self.completed = Some(Arc::new(f));
        self
    }

    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&J, &str) -> Value + Send + Sync + 'static,
    {
        self.failed = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> QueueBinding<J> {
        QueueBinding {
            address: self.address,
            created: self
                .created
                .unwrap_or_else(|| Arc::new(|job: &J| json!({ "jobId": job.job_id() }))),
            progress: self.progress.unwrap_or_else(|| {
                Arc::new(|_: &J, percent: u8, detail: &str| {
                    json!({ "percent": percent, "detail": detail })
                })
            }),
            completed: self
                .completed
                .unwrap_or_else(|| Arc::new(|_: &J, result: &Value| result.clone())),
            failed: self
                .failed
                .unwrap_or_else(|| Arc::new(|_: &J, error: &str| json!({ "error": error }))),
        }
    }
}
