use crate::{ConversationId, Error, UserId, X25519PublicKey};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// The two sides of a conversation. Order carries no meaning beyond storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participants {
    /// Usually the job owner.
    pub party_a: UserId,
    /// Usually the accepted proposer.
    pub party_b: UserId,
}

impl Participants {
    /// Whether `user` is one of the two parties.
    pub fn contains(&self, user: &UserId) -> bool {
        self.party_a == *user || self.party_b == *user
    }

    /// The other party, or `None` if `user` is not a participant.
    pub fn peer_of(&self, user: &UserId) -> Option<UserId> {
        if self.party_a == *user {
            Some(self.party_b)
        } else if self.party_b == *user {
            Some(self.party_a)
        } else {
            None
        }
    }
}

/// A public key one party published for a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    /// Base64 X25519 public key other parties encrypt to.
    pub public_key: String,
    /// Base64 Ed25519 verification key, if the party shared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
    /// When it was (last) published.
    pub published_at: DateTime<Utc>,
}

impl PublishedKey {
    /// Parses the confidentiality key.
    pub fn confidentiality_key(&self) -> Result<X25519PublicKey, Error> {
        X25519PublicKey::from_base64(&self.public_key)
    }

    /// Parses the verification key, if one was published.
    pub fn verifying_key(&self) -> Result<Option<VerifyingKey>, Error> {
        self.signing_key
            .as_deref()
            .map(decode_verifying_key)
            .transpose()
    }
}

pub(crate) fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, Error> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| Error::Serde(format!("Invalid signing key encoding: {err}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Protocol("Signing key must be exactly 32 bytes".to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|err| Error::Protocol(err.to_string()))
}

/// Negotiated key-exchange state of a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionState {
    /// What `party_a` published, if anything.
    pub party_a_public_key: Option<PublishedKey>,
    /// What `party_b` published, if anything.
    pub party_b_public_key: Option<PublishedKey>,
}

impl EncryptionState {
    /// Both parties have published a key.
    pub fn encryption_ready(&self) -> bool {
        self.party_a_public_key.is_some() && self.party_b_public_key.is_some()
    }
}

/// A two-party conversation as the relay stores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// The job this conversation was opened for.
    pub job_id: String,
    /// Who may read and write.
    pub participants: Participants,
    /// Key exchange state.
    pub encryption: EncryptionState,
    /// When the proposal was accepted.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Derived readiness flag.
    pub fn encryption_ready(&self) -> bool {
        self.encryption.encryption_ready()
    }

    /// The key `user` published, if any.
    pub fn published_key(&self, user: &UserId) -> Option<&PublishedKey> {
        if self.participants.party_a == *user {
            self.encryption.party_a_public_key.as_ref()
        } else if self.participants.party_b == *user {
            self.encryption.party_b_public_key.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn published_key_slot(
        &mut self,
        user: &UserId,
    ) -> Option<&mut Option<PublishedKey>> {
        if self.participants.party_a == *user {
            Some(&mut self.encryption.party_a_public_key)
        } else if self.participants.party_b == *user {
            Some(&mut self.encryption.party_b_public_key)
        } else {
            None
        }
    }
}
