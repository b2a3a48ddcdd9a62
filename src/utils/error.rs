//! Top-level error type.
//!
//! Each module owns the error enum for its own failures (`CodecError`,
//! `TransportError`, `PublishError`, ...). `QueuebusError` only exists to
//! give the binary a single type to bubble up with `?`.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::relay::RelayError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum QueuebusError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
}
