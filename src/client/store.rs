use crate::exchange::Readiness;
use crate::{
    AttachmentRef, ConversationId, DeliveryStatus, DeliveryTracker, EncryptionMode, MessageId,
    MessageKind, Transition, UserId, Verification,
};
use chrono::{DateTime, Utc};

/// A message as the UI shows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Relay-assigned id.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Decoded text, the attachment name for files, or the placeholder.
    pub text: String,
    /// Text or file.
    pub kind: MessageKind,
    /// Parsed attachment reference for file messages.
    pub attachment: Option<AttachmentRef>,
    /// How the payload was protected.
    pub mode: EncryptionMode,
    /// Signature check result.
    pub verification: Verification,
    /// Whether the text matches the content hash.
    pub hash_matches: bool,
    /// Lifecycle position.
    pub status: DeliveryStatus,
    /// Relay timestamp.
    pub created_at: DateTime<Utc>,
}

/// Every mutation of the [`ConversationStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreAction {
    /// Switch to a conversation, dropping everything held for the previous one.
    Open(ConversationId),
    /// Insert or refresh a message. A known status is never rolled back,
    /// but a newer one from the message is taken.
    Upsert(DisplayMessage),
    /// One message moved forward.
    Status(MessageId, DeliveryStatus),
    /// Many messages moved forward together.
    StatusBatch(Vec<MessageId>, DeliveryStatus),
    /// New key-exchange state.
    Readiness(Readiness),
}

/// The single owner of a client's conversation state.
///
/// Messages are kept ordered by timestamp then id, never by arrival.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversation_id: Option<ConversationId>,
    messages: Vec<DisplayMessage>,
    statuses: DeliveryTracker,
    readiness: Readiness,
}

impl ConversationStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an action and returns the ids whose status advanced.
    pub fn dispatch(&mut self, action: StoreAction) -> Vec<MessageId> {
        match action {
            StoreAction::Open(conversation_id) => {
                *self = Self {
                    conversation_id: Some(conversation_id),
                    ..Self::default()
                };
                Vec::new()
            }
            StoreAction::Upsert(mut message) => {
                let previous = self.statuses.status(&message.id);
                let status = self.statuses.track(message.id, message.status);
                message.status = status;
                let id = message.id;
                match self.messages.iter().position(|m| m.id == message.id) {
                    Some(index) => self.messages[index] = message,
                    None => {
                        let key = (message.created_at, message.id);
                        let position = self
                            .messages
                            .partition_point(|m| (m.created_at, m.id) < key);
                        self.messages.insert(position, message);
                    }
                }
                if previous.is_some_and(|previous| previous < status) {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
            StoreAction::Status(message_id, status) => {
                match self.statuses.apply(&message_id, status) {
                    Transition::Advanced { to, .. } => {
                        self.set_status(&message_id, to);
                        vec![message_id]
                    }
                    Transition::Unchanged(_) | Transition::Unknown => Vec::new(),
                }
            }
            StoreAction::StatusBatch(message_ids, status) => {
                let advanced = self.statuses.apply_batch(&message_ids, status);
                for message_id in &advanced {
                    self.set_status(message_id, status);
                }
                advanced
            }
            StoreAction::Readiness(readiness) => {
                self.readiness = readiness;
                Vec::new()
            }
        }
    }

    /// The open conversation.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    /// A single message.
    pub fn message(&self, message_id: &MessageId) -> Option<&DisplayMessage> {
        self.messages.iter().find(|m| m.id == *message_id)
    }

    /// Current status of a message.
    pub fn status(&self, message_id: &MessageId) -> Option<DeliveryStatus> {
        self.statuses.status(message_id)
    }

    /// Last known key-exchange state.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Messages addressed to `user` that have not reached `status` yet.
    pub fn incoming_below(&self, user: &UserId, status: DeliveryStatus) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| m.sender_id != *user && m.status < status)
            .map(|m| m.id)
            .collect()
    }

    fn set_status(&mut self, message_id: &MessageId, status: DeliveryStatus) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == *message_id) {
            message.status = status;
        }
    }
}
