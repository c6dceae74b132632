//! In-memory backend for tests and development mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// Volatile backend keeping every entry in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the backend holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidInput("key cannot be empty".into()));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        assert!(backend.get("secrets/a").await.unwrap().is_none());

        backend.put("secrets/a", b"v1").await.unwrap();
        backend.put("secrets/a", b"v2").await.unwrap();
        assert_eq!(backend.get("secrets/a").await.unwrap(), Some(b"v2".to_vec()));
        assert!(backend.exists("secrets/a").await.unwrap());

        assert!(backend.delete("secrets/a").await.unwrap());
        assert!(!backend.delete("secrets/a").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let backend = MemoryBackend::new();
        backend.put("secrets/b", b"1").await.unwrap();
        backend.put("secrets/a", b"2").await.unwrap();
        backend.put("groups/x", b"3").await.unwrap();
        backend.put("secretsx", b"4").await.unwrap();

        let keys = backend.list("secrets/").await.unwrap();
        assert_eq!(keys, vec!["secrets/a", "secrets/b"]);

        assert_eq!(backend.list("").await.unwrap().len(), 4);
        assert_eq!(backend.len().await, 4);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let backend = MemoryBackend::new();
        let result = backend.put("", b"v").await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }
}
