//! Queue adapter
//!
//! The only piece that sees both a job queue's lifecycle hooks and the
//! broker. A queue calls `on_job_*` as its jobs move through
//! `created → (progress)* → completed | failed`; the adapter turns each
//! transition into an envelope on the queue's channel.
//!
//! Delivery rules:
//! - `job.created` and `job.progress`: a single attempt; failures are
//!   logged and dropped
//! - `job.completed` and `job.failed`: retried in the background with
//!   exponential backoff, then logged at warn level and dropped
//! - no hook ever returns an error to the queue
//!
//! Coordination handlers subscribe to other queues' channels and run an
//! idempotent `action`, guarded by a bounded dedup ledger.

mod binding;
mod dedup;
mod queue_adapter;

use std::sync::Arc;
use std::time::Duration;

pub use binding::{QueueAddress, QueueBinding, QueueBindingBuilder, QueueJob};
pub use dedup::{DedupError, DedupStore, MemoryDedup};
pub use queue_adapter::{DeliveryOutcome, QueueAdapter, TerminalDelivery};

use crate::config::AdapterSettings;
use crate::persistence::SledDedup;

/// The dedup ledger described by `settings`: sled-backed when
/// `dedup_path` is set, in memory otherwise.
pub fn open_dedup_store(settings: &AdapterSettings) -> Result<Arc<dyn DedupStore>, DedupError> {
    let ttl = Duration::from_secs(settings.dedup_ttl_secs);
    match &settings.dedup_path {
        Some(path) => Ok(Arc::new(SledDedup::open(path, ttl, settings.dedup_capacity)?)),
        None => Ok(Arc::new(MemoryDedup::new(settings.dedup_capacity, ttl))),
    }
}
