//! Storage backend trait definition.

use async_trait::async_trait;

use crate::error::StorageError;

/// Durable key/value store used by the lifecycle engine.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a value with a key, replacing any previous value atomically.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value by key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List full keys starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Same as [`put`](Self::put), attributing the write to `actor`.
    ///
    /// Backends that keep no write history ignore the actor.
    async fn put_as(&self, key: &str, value: &[u8], actor: &str) -> Result<(), StorageError> {
        let _ = actor;
        self.put(key, value).await
    }

    /// Same as [`delete`](Self::delete), attributing the write to `actor`.
    async fn delete_as(&self, key: &str, actor: &str) -> Result<bool, StorageError> {
        let _ = actor;
        self.delete(key).await
    }

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
