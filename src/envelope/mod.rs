//! Message envelopes
//!
//! A `MessageEnvelope` carries one job-lifecycle event on a channel. The
//! `codec` functions turn envelopes into the flat UTF-8 JSON payload the
//! transport moves around and back again.
//!
//! Unknown `eventType` tags are never a decode failure: they come back as
//! `EventType::Custom` so consumers on newer versions can extend the set
//! without breaking older subscribers.

mod codec;
mod message;

pub use codec::{CodecError, decode, encode};
pub use message::{EventType, MessageEnvelope};

#[cfg(test)]
mod tests;
