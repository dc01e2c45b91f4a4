use crate::{ConversationId, DeliveryStatus, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire value of the signature field for messages sent before key exchange.
pub const FALLBACK_SIGNATURE: &str = "unsigned-fallback";

/// The integrity field of a message.
///
/// Strong messages carry a base64 Ed25519 signature over the plaintext.
/// Messages sent before readiness carry [`FALLBACK_SIGNATURE`] instead; their
/// payload is reversible by anyone and must not be presented as private.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageSignature {
    /// Base64 Ed25519 signature.
    Signed(String),
    /// The fallback sentinel. Also what an absent signature means.
    #[default]
    Fallback,
}

impl MessageSignature {
    /// Whether this is the fallback sentinel.
    pub fn is_fallback(&self) -> bool {
        matches!(self, MessageSignature::Fallback)
    }
}

impl From<String> for MessageSignature {
    fn from(value: String) -> Self {
        if value == FALLBACK_SIGNATURE {
            MessageSignature::Fallback
        } else {
            MessageSignature::Signed(value)
        }
    }
}

impl From<MessageSignature> for String {
    fn from(value: MessageSignature) -> Self {
        match value {
            MessageSignature::Signed(signature) => signature,
            MessageSignature::Fallback => FALLBACK_SIGNATURE.to_string(),
        }
    }
}

/// How a message body was protected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Sealed to the recipient's public key and signed.
    Sealed,
    /// Reversible encoding, no confidentiality.
    Fallback,
    /// Nothing could open the payload; a placeholder is shown instead.
    Undecodable,
}

/// What the payload decodes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// UTF-8 text.
    #[default]
    Text,
    /// A JSON [`AttachmentRef`].
    File,
}

/// Pointer to an uploaded attachment. Travels inside the encrypted payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Where the object store put the blob.
    pub url: String,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Media type, e.g. `application/pdf`.
    pub media_type: String,
}

/// A message as stored by the relay. Ciphertext only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Relay-assigned id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// The other participant.
    pub recipient_id: UserId,
    /// Base64 payload, sealed or fallback-encoded.
    pub ciphertext: String,
    /// Signature or fallback sentinel.
    #[serde(default)]
    pub signature: MessageSignature,
    /// Base64 SHA-256 of the plaintext.
    pub content_hash: String,
    /// Text or file.
    #[serde(default)]
    pub kind: MessageKind,
    /// Where the message is in its lifecycle.
    pub status: DeliveryStatus,
    /// When the relay accepted it.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message went out before key exchange completed.
    pub fn is_fallback(&self) -> bool {
        self.signature.is_fallback()
    }

    /// How the payload was protected.
    pub fn encryption_mode(&self) -> EncryptionMode {
        if self.is_fallback() {
            EncryptionMode::Fallback
        } else {
            EncryptionMode::Sealed
        }
    }
}
