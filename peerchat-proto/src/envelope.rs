//! Chat envelope exchanged over a room topic.
//!
//! The envelope is a UTF-8 JSON object with exactly three string fields:
//! `message`, `senderid` and `sendername`. Those field names are the wire
//! contract between relays and must not change.

use serde::{Deserialize, Serialize};

/// Error type for envelope encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope could not be serialized to JSON.
    #[error("envelope encode error: {0}")]
    Encode(serde_json::Error),
    /// The payload is not a well-formed envelope.
    #[error("envelope decode error: {0}")]
    Decode(serde_json::Error),
}

/// A chat message together with its sender metadata.
///
/// Produced by the publishing side from an outbound string plus the local
/// identity, and reconstructed on the receiving side. `sender_id` carries the
/// canonical text form of the sender's peer identity and must round-trip
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Message text as typed by the sender.
    pub message: String,
    /// Canonical string form of the sender's peer identity.
    #[serde(rename = "senderid")]
    pub sender_id: String,
    /// Display name of the sender at publish time.
    #[serde(rename = "sendername")]
    pub sender_name: String,
}

impl ChatEnvelope {
    /// Builds an envelope from its three parts.
    pub fn new(
        message: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
        }
    }
}

/// Encodes an envelope as JSON bytes.
///
/// # Errors
///
/// Returns [`EnvelopeError::Encode`] if serialization fails.
pub fn encode(envelope: &ChatEnvelope) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(envelope).map_err(EnvelopeError::Encode)
}

/// Decodes an envelope from JSON bytes.
///
/// Unknown fields are ignored; any of the three wire fields missing is an
/// error.
///
/// # Errors
///
/// Returns [`EnvelopeError::Decode`] if the bytes are not a valid envelope.
pub fn decode(bytes: &[u8]) -> Result<ChatEnvelope, EnvelopeError> {
    serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)
}
