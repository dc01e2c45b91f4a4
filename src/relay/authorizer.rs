use crate::{ConversationId, Error, Participants, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The identity service that knows who accepted which proposal.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `principal` may read and write `conversation_id`.
    async fn is_participant(
        &self,
        principal: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error>;
}

/// In-memory [`Authorizer`] backed by a table of accepted proposals.
#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    entries: RwLock<HashMap<ConversationId, Participants>>,
}

impl ParticipantDirectory {
    /// An empty directory. Nobody is authorized for anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `participants` share `conversation_id`.
    pub async fn register(&self, conversation_id: ConversationId, participants: Participants) {
        self.entries
            .write()
            .await
            .insert(conversation_id, participants);
    }

    /// Revokes access to `conversation_id` for both parties.
    pub async fn revoke(&self, conversation_id: &ConversationId) {
        self.entries.write().await.remove(conversation_id);
    }
}

#[async_trait]
impl Authorizer for ParticipantDirectory {
    async fn is_participant(
        &self,
        principal: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool, Error> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(conversation_id)
            .is_some_and(|participants| participants.contains(principal)))
    }
}
