//! Channel relay
//!
//! A small self-hostable realtime channel service. It is the counterpart of
//! `transport::WebSocketTransport`: clients authenticate, subscribe to named
//! channels, and publish opaque `data` strings that the relay fans out to
//! every subscriber of the channel (the publisher included, if subscribed).
//!
//! The relay keeps no history. A client that is not connected when a
//! message is published never sees it.

pub mod auth;
pub mod channel;
pub mod client;
pub mod engine;
pub mod server;

use thiserror::Error;

pub use engine::Relay;
pub use server::{RelayHandle, RelayServer};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),
}
