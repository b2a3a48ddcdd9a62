use thiserror::Error;

use super::message::MessageEnvelope;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("envelope is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize an envelope to its wire form (UTF-8 JSON).
pub fn encode(envelope: &MessageEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse a wire payload back into an envelope.
pub fn decode(bytes: &[u8]) -> Result<MessageEnvelope, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}
