use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle event carried by an envelope.
///
/// Serialized as its string tag (`job.created`, `job.progress`,
/// `job.completed`, `job.failed`); any other tag round-trips through
/// `Custom` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    JobCreated,
    JobProgress,
    JobCompleted,
    JobFailed,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::JobCreated => "job.created",
            EventType::JobProgress => "job.progress",
            EventType::JobCompleted => "job.completed",
            EventType::JobFailed => "job.failed",
            EventType::Custom(tag) => tag,
        }
    }

    /// `job.completed` and `job.failed` end a job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::JobCompleted | EventType::JobFailed)
    }

    /// Events a queue fires at most once per job.
    pub fn is_once_per_job(&self) -> bool {
        matches!(
            self,
            EventType::JobCreated | EventType::JobCompleted | EventType::JobFailed
        )
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "job.created" => EventType::JobCreated,
            "job.progress" => EventType::JobProgress,
            "job.completed" => EventType::JobCompleted,
            "job.failed" => EventType::JobFailed,
            _ => EventType::Custom(tag),
        }
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        EventType::from(tag.to_string())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Custom(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit transmitted on a channel.
///
/// Field names on the wire are camelCase: `id, channel, eventType, jobId,
/// sourceQueue, payload, timestamp, correlationId`. `timestamp` is
/// milliseconds since the UNIX epoch and is stamped by whoever builds the
/// envelope (the queue adapter), never by the transport.
///
/// `id` is unique per envelope instance: one job produces many envelopes
/// over its lifecycle and each gets a fresh id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub id: String,
    pub channel: String,
    pub event_type: EventType,
    pub job_id: String,
    pub source_queue: String,
    /// Event-specific data. The broker never looks inside.
    #[serde(default)]
    pub payload: Value,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl MessageEnvelope {
    pub fn new(
        channel: impl Into<String>,
        event_type: EventType,
        job_id: impl Into<String>,
        source_queue: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            event_type,
            job_id: job_id.into(),
            source_queue: source_queue.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
