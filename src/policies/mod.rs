//! Delay policies shared by the reconnect loop and terminal-event retries.

mod backoff;
mod jitter;

pub use backoff::Backoff;
pub use jitter::Jitter;
