mod keypair;
pub(crate) use keypair::generate_random_seed;
pub use keypair::*;

use crate::store::{LocalKeyRecord, LocalMessageStore, LocalStore};
use crate::{ConversationId, Error};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether provisioned keys will still be there after a reload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPersistence {
    /// Stored locally; the same keys come back after a reload.
    Persisted,
    /// Local storage was unusable; the keys live only for this session.
    Ephemeral,
}

/// Keys handed out by the [`KeyManager`].
#[derive(Clone)]
pub struct ProvisionedKeys {
    /// The key material.
    pub keys: Arc<ConversationKeys>,
    /// Whether it was persisted.
    pub persistence: KeyPersistence,
}

/// Produces and persists per-conversation key material.
///
/// Never touches the network. Keys are cached for the session once
/// provisioned, so repeated lookups do not hit storage and ephemeral keys stay
/// stable until the session ends.
pub struct KeyManager<S: LocalStore> {
    store: Arc<LocalMessageStore<S>>,
    session: HashMap<ConversationId, ProvisionedKeys>,
}

impl<S: LocalStore> KeyManager<S> {
    /// Creates a manager over the given local store.
    pub fn new(store: Arc<LocalMessageStore<S>>) -> Self {
        Self {
            store,
            session: HashMap::new(),
        }
    }

    /// Returns the keys for `conversation_id`, generating and persisting them
    /// on first use.
    ///
    /// If storage is unreadable or unwritable the keys are generated anyway and
    /// tagged [`KeyPersistence::Ephemeral`]. Only a failure to generate keys at
    /// all is an error.
    pub fn get_or_create_keys(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<ProvisionedKeys, Error> {
        if let Some(provisioned) = self.session.get(conversation_id) {
            return Ok(provisioned.clone());
        }

        let provisioned = match self.store.load_keys(conversation_id) {
            Ok(Some(record)) => ProvisionedKeys {
                keys: Arc::new(record.keys),
                persistence: KeyPersistence::Persisted,
            },
            Ok(None) => self.generate_and_persist(conversation_id)?,
            Err(err) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    error = %err,
                    "local key storage unreadable, using ephemeral session keys"
                );
                ProvisionedKeys {
                    keys: Arc::new(Self::generate()?),
                    persistence: KeyPersistence::Ephemeral,
                }
            }
        };

        self.session
            .insert(*conversation_id, provisioned.clone());
        Ok(provisioned)
    }

    /// Forgets the keys for a conversation. The next lookup regenerates them.
    pub fn reset_keys(&mut self, conversation_id: &ConversationId) -> Result<(), Error> {
        self.session.remove(conversation_id);
        self.store.delete_keys(conversation_id)?;
        tracing::info!(conversation = %conversation_id, "conversation keys reset");
        Ok(())
    }

    fn generate_and_persist(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ProvisionedKeys, Error> {
        let record = LocalKeyRecord {
            conversation_id: *conversation_id,
            keys: Self::generate()?,
            created_at: Utc::now(),
        };

        let persistence = match self.store.save_keys(&record) {
            Ok(()) => {
                tracing::debug!(conversation = %conversation_id, "generated conversation keys");
                KeyPersistence::Persisted
            }
            Err(err) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    error = %err,
                    "could not persist conversation keys, using them for this session only"
                );
                KeyPersistence::Ephemeral
            }
        };

        Ok(ProvisionedKeys {
            keys: Arc::new(record.keys),
            persistence,
        })
    }

    fn generate() -> Result<ConversationKeys, Error> {
        ConversationKeys::generate().map_err(|err| Error::KeyUnavailable(err.to_string()))
    }
}
