use crate::{ConversationId, Error, Message, MessageId};
use serde::{Deserialize, Serialize};

/// A real-time event. Every event names the conversation it belongs to.
///
/// Frames are JSON objects tagged by `type`:
///
/// ```json
/// { "type": "messages_read", "conversationId": "…", "messageIds": ["…"] }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A new ciphertext message for the recipient.
    EncryptedMessage {
        /// The stored message, ciphertext only.
        message: Message,
    },

    /// The recipient's client has the message.
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Acknowledged message.
        message_id: MessageId,
    },

    /// The recipient has read a batch of messages.
    #[serde(rename_all = "camelCase")]
    MessagesRead {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Every message in the batch.
        message_ids: Vec<MessageId>,
    },

    /// Both public keys are now published.
    #[serde(rename_all = "camelCase")]
    EncryptionReady {
        /// The conversation that became ready.
        conversation_id: ConversationId,
    },
}

impl TransportEvent {
    /// The conversation this event is about.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            TransportEvent::EncryptedMessage { message } => message.conversation_id,
            TransportEvent::MessageDelivered {
                conversation_id, ..
            }
            | TransportEvent::MessagesRead {
                conversation_id, ..
            }
            | TransportEvent::EncryptionReady { conversation_id } => *conversation_id,
        }
    }

    /// Short name for logs, same as the wire tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::EncryptedMessage { .. } => "encrypted_message",
            TransportEvent::MessageDelivered { .. } => "message_delivered",
            TransportEvent::MessagesRead { .. } => "messages_read",
            TransportEvent::EncryptionReady { .. } => "encryption_ready",
        }
    }

    /// Encodes the event as a JSON frame.
    pub fn to_frame(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON frame.
    pub fn from_frame(frame: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(frame)?)
    }
}
