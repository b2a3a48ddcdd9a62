//! # queuebus
//!
//! Cross-queue coordination over a publish/subscribe channel service. Each
//! job queue publishes its lifecycle events (`job.created`,
//! `job.progress`, `job.completed`, `job.failed`) to its own channel, and
//! other queues subscribe to react, typically by enqueueing a dependent
//! job. No queue ever calls another directly, and a queue's own job state
//! never depends on the broker being up.
//!
//! ## Modules
//!
//! - `envelope`: the wire envelope and its JSON codec.
//! - `transport`: the `ChannelTransport` seam plus in-memory and WebSocket
//!   implementations.
//! - `broker`: typed publish/subscribe with per-subscription workers.
//! - `registry`: event-type → handler lookup, itself a broker handler.
//! - `adapter`: bridges one job queue's lifecycle hooks to the broker and
//!   runs idempotent coordination actions.
//! - `persistence`: sled-backed dedup ledger.
//! - `relay`: a small WebSocket channel relay for self-hosting.
//! - `config`, `policies`, `utils`: settings, backoff, logging and errors.

pub mod adapter;
pub mod broker;
pub mod config;
pub mod envelope;
pub mod persistence;
pub mod policies;
pub mod registry;
pub mod relay;
pub mod transport;
pub mod utils;

pub use adapter::{DeliveryOutcome, QueueAdapter, QueueAddress, QueueBinding, QueueJob};
pub use broker::{EnvelopeHandler, EventFilter, HandlerError, MessageBroker, handler_fn};
pub use envelope::{EventType, MessageEnvelope};
pub use registry::EventHandlerRegistry;
pub use transport::{ChannelTransport, Credentials};
