//! The server side of the messaging core.
//!
//! [`Relay`] is the API contract clients talk to. Each method maps onto one
//! HTTP route of the deployed service:
//!
//! | method           | route                                   |
//! |------------------|-----------------------------------------|
//! | `exchange_keys`  | `POST /exchange-keys`                   |
//! | `conversation`   | `GET /conversations/:id`                |
//! | `submit_message` | `POST /messages`                        |
//! | `messages`       | `GET /messages?conversationId&limit`    |
//! | `message`        | `GET /messages/:id`                     |
//! | `mark_delivered` | `PUT /messages/:id/delivered`           |
//! | `mark_read`      | `PUT /messages/read`                    |
//!
//! The relay stores ciphertext and public keys only. It never evaluates
//! message content.

mod authorizer;
pub use authorizer::*;
mod memory;
pub use memory::*;
mod objects;
pub use objects::*;

use crate::{
    Conversation, ConversationId, DeliveryStatus, Error, Message, MessageId, MessageKind,
    MessageSignature, Transition, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /exchange-keys`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeysRequest {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Base64 X25519 public key.
    pub public_key: String,
    /// Base64 Ed25519 verification key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

/// Response of `POST /exchange-keys`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeysResponse {
    /// Both parties have now published.
    pub encryption_ready: bool,
}

/// Body of `POST /messages`. The sender is the authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMessage {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Base64 payload.
    pub ciphertext: String,
    /// Base64 SHA-256 of the plaintext.
    pub content_hash: String,
    /// Signature or fallback sentinel.
    #[serde(default)]
    pub signature: MessageSignature,
    /// Text or file.
    #[serde(default)]
    pub kind: MessageKind,
}

/// Response of `POST /messages`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Relay-assigned id.
    pub message_id: MessageId,
    /// When the relay stored it.
    pub timestamp: DateTime<Utc>,
    /// `delivered` if the recipient was connected, otherwise `sent`.
    pub status: DeliveryStatus,
}

/// The relay API. Every call is made on behalf of an authenticated principal.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Publishes `principal`'s public key for a conversation.
    ///
    /// Re-publishing replaces the previous key.
    async fn exchange_keys(
        &self,
        principal: UserId,
        request: ExchangeKeysRequest,
    ) -> Result<ExchangeKeysResponse, Error>;

    /// Participants and key-exchange state.
    async fn conversation(
        &self,
        principal: UserId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, Error>;

    /// Stores a ciphertext message from `principal` to the other participant.
    async fn submit_message(
        &self,
        principal: UserId,
        message: SubmitMessage,
    ) -> Result<SubmitReceipt, Error>;

    /// The newest `limit` messages, oldest first.
    async fn messages(
        &self,
        principal: UserId,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, Error>;

    /// One stored message, as the relay holds it.
    ///
    /// Clients confirm pushed events against this before trusting them.
    async fn message(&self, principal: UserId, message_id: MessageId) -> Result<Message, Error>;

    /// Recipient acknowledges receipt of one message.
    async fn mark_delivered(&self, principal: UserId, message_id: MessageId)
    -> Result<Transition, Error>;

    /// Recipient reads a batch. Returns the ids whose status advanced.
    async fn mark_read(
        &self,
        principal: UserId,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<MessageId>, Error>;
}
