use crate::{ConversationId, UserId};
use std::time::Duration;

/// Errors that can occur in the messaging core.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// No local key material exists and none could be generated.
    #[error("Key material unavailable: {0}")]
    KeyUnavailable(String),

    /// A ciphertext could not be opened with the current keys.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The peer's public key did not show up within the exchange budget.
    #[error("Key exchange did not complete within {0:?}")]
    ExchangeTimeout(Duration),

    /// The real-time connection is down.
    #[error("Transport disconnected")]
    TransportDisconnected,

    /// The caller is not a participant of the conversation.
    #[error("{principal} is not a participant in conversation {conversation}")]
    AuthorizationDenied {
        /// Who asked.
        principal: UserId,
        /// What they asked about.
        conversation: ConversationId,
    },

    /// A conversation, message or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A cryptographic operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// Local persistent storage failed or returned corrupted data.
    #[error("Local storage error: {0}")]
    Storage(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::Storage(format!("Corrupted record: {value}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}
