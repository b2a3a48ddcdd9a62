//! Message broker
//!
//! Typed publish/subscribe on top of a `ChannelTransport`. The broker is
//! the single place where envelopes are encoded and decoded and where
//! decoded envelopes are dispatched to handlers.
//!
//! ```text
//! transport ──► raw callback (one per channel) ──► decode
//!                                                   │
//!                 ┌─────────────────────────────────┤ filter by eventType
//!                 ▼                                 ▼
//!        [queue] ─► worker ─► handler     [queue] ─► worker ─► handler
//! ```
//!
//! - each subscription has its own bounded queue and worker task; handlers
//!   run sequentially in arrival order, and a slow handler only delays its
//!   own subscription
//! - malformed payloads are logged and dropped before any handler sees them
//! - no deduplication by envelope id: delivery is at-least-once and
//!   handlers own their idempotency
//! - the broker owns the transport lifecycle (`start`/`shutdown`); holders
//!   of a `MessageBroker` can publish and subscribe but cannot reach the
//!   connection itself

mod engine;
mod handler;
mod monitor;
mod subscription;

pub use engine::{BrokerError, MessageBroker, PublishError};
pub use handler::{EnvelopeHandler, FnHandler, HandlerError, handler_fn};
pub use monitor::{LogObserver, Monitor};
pub use subscription::{EventFilter, SubscriptionHandle};

pub(crate) use handler::invoke_guarded;

#[cfg(test)]
mod tests;
