//! Durable client-side persistence.
//!
//! Two record families live here: key material keyed by conversation, and the
//! plaintext mirror of self-sent messages keyed by message. Neither is a
//! backup; clearing the backend just forces regeneration or a placeholder.

mod file;
mod memory;
mod records;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use records::*;

use crate::{ConversationId, Error, MessageId};

/// Which record family a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Conversation key material.
    Keys,
    /// Plaintext of self-sent messages.
    Plaintext,
}

impl Namespace {
    /// Stable name used by backends for directories or prefixes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Keys => "keys",
            Namespace::Plaintext => "plaintext",
        }
    }
}

/// A byte-oriented key-value backend.
///
/// Every call is self-contained: open, read or write, close. Implementations
/// must not hold handles across calls.
pub trait LocalStore: Send + Sync {
    /// Reads a value, `Ok(None)` if absent.
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Writes or replaces a value.
    fn put(&self, namespace: Namespace, key: &str, value: &[u8]) -> Result<(), Error>;

    /// Removes a value. Removing an absent key is not an error.
    fn delete(&self, namespace: Namespace, key: &str) -> Result<(), Error>;
}

/// Typed access to the two local record families.
pub struct LocalMessageStore<S: LocalStore> {
    backend: S,
}

impl<S: LocalStore> LocalMessageStore<S> {
    /// Wraps a backend.
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    /// Loads the key record for a conversation.
    pub fn load_keys(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<LocalKeyRecord>, Error> {
        self.backend
            .get(Namespace::Keys, &conversation_id.to_string())?
            .map(|bytes| LocalKeyRecord::deserialize(&bytes))
            .transpose()
    }

    /// Persists a key record, replacing any previous one.
    pub fn save_keys(&self, record: &LocalKeyRecord) -> Result<(), Error> {
        self.backend.put(
            Namespace::Keys,
            &record.conversation_id.to_string(),
            &record.serialize(),
        )
    }

    /// Deletes the key record for a conversation.
    pub fn delete_keys(&self, conversation_id: &ConversationId) -> Result<(), Error> {
        self.backend
            .delete(Namespace::Keys, &conversation_id.to_string())
    }

    /// Loads the cached plaintext of a self-sent message.
    pub fn load_plaintext(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<LocalPlaintextRecord>, Error> {
        self.backend
            .get(Namespace::Plaintext, &message_id.to_string())?
            .map(|bytes| LocalPlaintextRecord::deserialize(&bytes))
            .transpose()
    }

    /// Caches the plaintext of a self-sent message.
    pub fn save_plaintext(&self, record: &LocalPlaintextRecord) -> Result<(), Error> {
        self.backend.put(
            Namespace::Plaintext,
            &record.message_id.to_string(),
            &record.serialize(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConversationKeys;
    use chrono::Utc;

    #[test]
    fn test_keys_survive_reload() {
        let backend = MemoryStore::new();
        let conversation_id = ConversationId::new();
        let keys = ConversationKeys::generate().unwrap();
        let original = keys.to_bytes();

        let store = LocalMessageStore::new(backend.clone());
        store
            .save_keys(&LocalKeyRecord {
                conversation_id,
                keys,
                created_at: Utc::now(),
            })
            .unwrap();
        drop(store);

        let reloaded = LocalMessageStore::new(backend);
        let record = reloaded.load_keys(&conversation_id).unwrap().unwrap();
        assert_eq!(record.keys.to_bytes(), original);
    }

    #[test]
    fn test_delete_keys() {
        let store = LocalMessageStore::new(MemoryStore::new());
        let conversation_id = ConversationId::new();
        store
            .save_keys(&LocalKeyRecord {
                conversation_id,
                keys: ConversationKeys::generate().unwrap(),
                created_at: Utc::now(),
            })
            .unwrap();

        store.delete_keys(&conversation_id).unwrap();
        assert!(store.load_keys(&conversation_id).unwrap().is_none());
        // Deleting twice is fine
        store.delete_keys(&conversation_id).unwrap();
    }

    #[test]
    fn test_plaintext_cache() {
        let store = LocalMessageStore::new(MemoryStore::new());
        let record = LocalPlaintextRecord {
            message_id: MessageId::new(),
            conversation_id: ConversationId::new(),
            text: "see you at the site visit".to_string(),
            created_at: Utc::now(),
        };

        store.save_plaintext(&record).unwrap();
        let loaded = store.load_plaintext(&record.message_id).unwrap().unwrap();
        assert_eq!(loaded.text, record.text);
        assert!(store.load_plaintext(&MessageId::new()).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_record_surfaces_error() {
        let backend = MemoryStore::new();
        let conversation_id = ConversationId::new();
        backend
            .put(Namespace::Keys, &conversation_id.to_string(), b"\xff\xff\xff")
            .unwrap();

        let store = LocalMessageStore::new(backend);
        assert!(matches!(
            store.load_keys(&conversation_id),
            Err(Error::Storage(_))
        ));
    }
}
