use super::{LocalStore, Namespace};
use crate::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Entries = HashMap<(Namespace, String), Vec<u8>>;

/// In-memory backend.
///
/// Clones share the same entries, so dropping a client and building a new one
/// over a clone simulates a page reload.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry, as if the user cleared site data.
    pub fn clear(&self) -> Result<(), Error> {
        self.lock()?.clear();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.lock()?.get(&(namespace, key.to_string())).cloned())
    }

    fn put(&self, namespace: Namespace, key: &str, value: &[u8]) -> Result<(), Error> {
        self.lock()?
            .insert((namespace, key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: Namespace, key: &str) -> Result<(), Error> {
        self.lock()?.remove(&(namespace, key.to_string()));
        Ok(())
    }
}
