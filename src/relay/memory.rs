use crate::relay::{
    Authorizer, ExchangeKeysRequest, ExchangeKeysResponse, Relay, SubmitMessage, SubmitReceipt,
};
use crate::transport::RoomHub;
use crate::{
    Conversation, ConversationId, DeliveryStatus, DeliveryTracker, EncryptionState, Error,
    Message, MessageId, Participants, PublishedKey, RelayConfig, Transition, UserId,
    X25519PublicKey, decode_verifying_key,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct RelayState {
    conversations: HashMap<ConversationId, Conversation>,
    // conversation -> messages in arrival order
    messages: HashMap<ConversationId, Vec<Message>>,
    // message -> (conversation, position)
    index: HashMap<MessageId, (ConversationId, usize)>,
    statuses: DeliveryTracker,
}

impl RelayState {
    fn message(&self, message_id: &MessageId) -> Option<&Message> {
        let (conversation_id, position) = self.index.get(message_id)?;
        self.messages
            .get(conversation_id)
            .and_then(|messages| messages.get(*position))
    }

    fn message_mut(&mut self, message_id: &MessageId) -> Option<&mut Message> {
        let (conversation_id, position) = self.index.get(message_id)?;
        self.messages
            .get_mut(conversation_id)
            .and_then(|messages| messages.get_mut(*position))
    }
}

/// In-process [`Relay`] holding everything in memory.
///
/// Presence comes from the shared [`RoomHub`]: a message submitted while the
/// recipient has a live connection is stored as `delivered` straight away.
pub struct MemoryRelay {
    authorizer: Arc<dyn Authorizer>,
    hub: RoomHub,
    config: RelayConfig,
    state: RwLock<RelayState>,
}

impl MemoryRelay {
    /// Creates a relay that asks `authorizer` before every operation.
    pub fn new(authorizer: Arc<dyn Authorizer>, hub: RoomHub, config: RelayConfig) -> Self {
        Self {
            authorizer,
            hub,
            config,
            state: RwLock::default(),
        }
    }

    /// Creates the conversation for an accepted proposal.
    pub async fn open_conversation(
        &self,
        job_id: impl Into<String>,
        participants: Participants,
    ) -> Result<Conversation, Error> {
        if participants.party_a == participants.party_b {
            return Err(Error::Protocol(
                "A conversation needs two distinct participants".to_string(),
            ));
        }

        let conversation = Conversation {
            id: ConversationId::new(),
            job_id: job_id.into(),
            participants,
            encryption: EncryptionState::default(),
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        tracing::info!(
            conversation = %conversation.id,
            job = %conversation.job_id,
            "conversation opened"
        );
        Ok(conversation)
    }

    async fn authorize(
        &self,
        principal: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<(), Error> {
        if self
            .authorizer
            .is_participant(principal, conversation_id)
            .await?
        {
            Ok(())
        } else {
            tracing::warn!(
                principal = %principal,
                conversation = %conversation_id,
                "authorization denied"
            );
            Err(Error::AuthorizationDenied {
                principal: *principal,
                conversation: *conversation_id,
            })
        }
    }

    async fn stored(&self, message_id: &MessageId) -> Result<Message, Error> {
        let state = self.state.read().await;
        state
            .message(message_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))
    }

    fn require_recipient(message: &Message, principal: &UserId) -> Result<(), Error> {
        if message.recipient_id == *principal {
            Ok(())
        } else {
            Err(Error::AuthorizationDenied {
                principal: *principal,
                conversation: message.conversation_id,
            })
        }
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn exchange_keys(
        &self,
        principal: UserId,
        request: ExchangeKeysRequest,
    ) -> Result<ExchangeKeysResponse, Error> {
        self.authorize(&principal, &request.conversation_id).await?;

        X25519PublicKey::from_base64(&request.public_key)?;
        if let Some(signing_key) = &request.signing_key {
            decode_verifying_key(signing_key)?;
        }

        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&request.conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", request.conversation_id)))?;

        let slot = conversation.published_key_slot(&principal).ok_or(
            Error::AuthorizationDenied {
                principal,
                conversation: request.conversation_id,
            },
        )?;
        *slot = Some(PublishedKey {
            public_key: request.public_key,
            signing_key: request.signing_key,
            published_at: Utc::now(),
        });

        let encryption_ready = conversation.encryption_ready();
        tracing::info!(
            conversation = %request.conversation_id,
            principal = %principal,
            encryption_ready,
            "public key published"
        );
        Ok(ExchangeKeysResponse { encryption_ready })
    }

    async fn conversation(
        &self,
        principal: UserId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, Error> {
        self.authorize(&principal, &conversation_id).await?;

        let state = self.state.read().await;
        state
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))
    }

    async fn submit_message(
        &self,
        principal: UserId,
        message: SubmitMessage,
    ) -> Result<SubmitReceipt, Error> {
        self.authorize(&principal, &message.conversation_id).await?;

        if message.ciphertext.len() > self.config.max_ciphertext_len {
            return Err(Error::Protocol(format!(
                "Ciphertext of {} bytes exceeds limit of {}",
                message.ciphertext.len(),
                self.config.max_ciphertext_len
            )));
        }

        let recipient_id = {
            let state = self.state.read().await;
            let conversation = state
                .conversations
                .get(&message.conversation_id)
                .ok_or_else(|| {
                    Error::NotFound(format!("conversation {}", message.conversation_id))
                })?;
            conversation.participants.peer_of(&principal).ok_or(
                Error::AuthorizationDenied {
                    principal,
                    conversation: message.conversation_id,
                },
            )?
        };

        let status = if self.hub.is_connected(&recipient_id).await {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        };

        let stored = Message {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sender_id: principal,
            recipient_id,
            ciphertext: message.ciphertext,
            signature: message.signature,
            content_hash: message.content_hash,
            kind: message.kind,
            status,
            created_at: Utc::now(),
        };
        let receipt = SubmitReceipt {
            message_id: stored.id,
            timestamp: stored.created_at,
            status,
        };

        let mut state = self.state.write().await;
        state.statuses.track(stored.id, status);
        let messages = state.messages.entry(stored.conversation_id).or_default();
        let position = messages.len();
        let conversation_id = stored.conversation_id;
        tracing::debug!(
            conversation = %conversation_id,
            message = %stored.id,
            fallback = stored.is_fallback(),
            status = ?status,
            "message stored"
        );
        messages.push(stored);
        state
            .index
            .insert(receipt.message_id, (conversation_id, position));

        Ok(receipt)
    }

    async fn messages(
        &self,
        principal: UserId,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, Error> {
        self.authorize(&principal, &conversation_id).await?;

        let limit = limit.min(self.config.max_history_limit);
        let state = self.state.read().await;
        if !state.conversations.contains_key(&conversation_id) {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }

        let messages = state
            .messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn message(&self, principal: UserId, message_id: MessageId) -> Result<Message, Error> {
        let message = self.stored(&message_id).await?;
        self.authorize(&principal, &message.conversation_id).await?;
        Ok(message)
    }

    async fn mark_delivered(
        &self,
        principal: UserId,
        message_id: MessageId,
    ) -> Result<Transition, Error> {
        let message = self.stored(&message_id).await?;
        self.authorize(&principal, &message.conversation_id).await?;
        Self::require_recipient(&message, &principal)?;

        let mut state = self.state.write().await;
        let transition = state
            .statuses
            .apply(&message_id, DeliveryStatus::Delivered);
        if let Transition::Advanced { to, .. } = transition {
            if let Some(message) = state.message_mut(&message_id) {
                message.status = to;
            }
        }
        Ok(transition)
    }

    async fn mark_read(
        &self,
        principal: UserId,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<MessageId>, Error> {
        let known: Vec<Message> = {
            let state = self.state.read().await;
            message_ids
                .iter()
                .filter_map(|message_id| state.message(message_id).cloned())
                .collect()
        };

        // Reject the whole batch if any known message is not addressed to the caller
        let mut checked = HashSet::new();
        for message in &known {
            if checked.insert(message.conversation_id) {
                self.authorize(&principal, &message.conversation_id).await?;
            }
            Self::require_recipient(message, &principal)?;
        }

        let mut state = self.state.write().await;
        let advanced = state
            .statuses
            .apply_batch(&message_ids, DeliveryStatus::Read);
        for message_id in &advanced {
            if let Some(message) = state.message_mut(message_id) {
                message.status = DeliveryStatus::Read;
            }
        }

        if !advanced.is_empty() {
            tracing::debug!(principal = %principal, count = advanced.len(), "messages read");
        }
        Ok(advanced)
    }
}
