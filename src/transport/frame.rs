//! Relay wire frames.
//!
//! JSON objects tagged by `type`. The `data` field of `publish` and
//! `message` frames is the encoded envelope text; the relay forwards it
//! without parsing.

use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

/// Frames sent by a transport client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish { channel: String, data: String },
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Authenticated {},
    Error { message: String },
    Message { channel: String, data: String },
}

impl ClientFrame {
    pub fn to_ws(&self) -> Result<WsMessage, serde_json::Error> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}

impl RelayFrame {
    pub fn to_ws(&self) -> Result<WsMessage, serde_json::Error> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}
