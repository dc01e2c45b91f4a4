use crate::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Blob storage for attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` and returns a URL to fetch them by.
    async fn put(&self, name: &str, media_type: &str, bytes: Vec<u8>) -> Result<String, Error>;
}

/// A stored blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Original name.
    pub name: String,
    /// Media type as given at upload.
    pub media_type: String,
    /// Contents.
    pub bytes: Vec<u8>,
}

/// In-memory [`ObjectStore`].
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    max_size: Option<usize>,
}

impl MemoryObjectStore {
    /// An empty store with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store rejecting blobs over `max_size` bytes.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            objects: RwLock::default(),
            max_size: Some(max_size),
        }
    }

    /// Fetches a blob by the URL `put` returned.
    pub async fn get(&self, url: &str) -> Option<StoredObject> {
        self.objects.read().await.get(url).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, media_type: &str, bytes: Vec<u8>) -> Result<String, Error> {
        if let Some(max_size) = self.max_size {
            if bytes.len() > max_size {
                return Err(Error::Protocol(format!(
                    "Attachment of {} bytes exceeds limit of {max_size}",
                    bytes.len()
                )));
            }
        }

        let url = format!("memory://objects/{}", Uuid::new_v4());
        let object = StoredObject {
            name: name.to_string(),
            media_type: media_type.to_string(),
            bytes,
        };
        self.objects.write().await.insert(url.clone(), object);
        Ok(url)
    }
}
