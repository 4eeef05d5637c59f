//! JSON codec for stream messages.
//!
//! Stream messages travel to the host as UTF-8 JSON strings.

use thiserror::Error;

use crate::messages::StreamMessage;

/// Maximum encoded message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur while encoding, decoding or parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded message exceeds the maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Command method is not part of the command surface.
    #[error("Method not implemented: {0}")]
    UnknownMethod(String),

    /// Command requires an argument that was not supplied.
    #[error("Missing arguments for method: {0}")]
    MissingArguments(String),
}

/// Encode a stream message to its JSON envelope.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &StreamMessage) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(message).map_err(ProtocolError::Encode)?;

    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(json.len()));
    }

    Ok(json)
}

/// Decode a stream message from its JSON envelope.
///
/// # Errors
///
/// Returns an error if the data is too large, not valid JSON, or does not
/// carry exactly one populated branch.
pub fn decode(data: &str) -> Result<StreamMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    Ok(serde_json::from_str(data)?)
}
