use crate::relay::{ExchangeKeysRequest, Relay};
use crate::{ConversationId, ConversationKeys, Error, UserId, X25519PublicKey};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;

/// Key-exchange state of one conversation as seen by one party.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Both parties have published.
    pub encryption_ready: bool,
    /// What the peer encrypts to us with, once published.
    pub peer_public_key: Option<X25519PublicKey>,
    /// What the peer signs with, if they shared it.
    pub peer_signing_key: Option<VerifyingKey>,
}

/// Publishes our public keys and reads back the peer's.
#[derive(Clone)]
pub struct KeyExchange {
    relay: Arc<dyn Relay>,
    user: UserId,
}

impl KeyExchange {
    /// Acts on behalf of `user`.
    pub fn new(relay: Arc<dyn Relay>, user: UserId) -> Self {
        Self { relay, user }
    }

    /// Publishes both public halves of `keys`.
    ///
    /// Returns whether the peer had already published, in which case the
    /// caller is the one that should announce readiness.
    pub async fn publish(
        &self,
        conversation_id: ConversationId,
        keys: &ConversationKeys,
    ) -> Result<bool, Error> {
        let request = ExchangeKeysRequest {
            conversation_id,
            public_key: keys.public_key().to_base64(),
            signing_key: Some(STANDARD.encode(keys.signing_key_public().as_bytes())),
        };

        let response = self.relay.exchange_keys(self.user, request).await?;
        tracing::debug!(
            conversation = %conversation_id,
            encryption_ready = response.encryption_ready,
            "published conversation keys"
        );
        Ok(response.encryption_ready)
    }

    /// Reads the current exchange state. Idempotent.
    pub async fn fetch_readiness(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Readiness, Error> {
        let conversation = self.relay.conversation(self.user, conversation_id).await?;
        let peer = conversation
            .participants
            .peer_of(&self.user)
            .ok_or(Error::AuthorizationDenied {
                principal: self.user,
                conversation: conversation_id,
            })?;

        let Some(published) = conversation.published_key(&peer) else {
            return Ok(Readiness {
                encryption_ready: conversation.encryption_ready(),
                ..Readiness::default()
            });
        };

        Ok(Readiness {
            encryption_ready: conversation.encryption_ready(),
            peer_public_key: Some(published.confidentiality_key()?),
            peer_signing_key: published.verifying_key()?,
        })
    }
}
