//! IAM credential provider seam.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use vigil_crypto::random;
use zeroize::Zeroizing;

use crate::error::CollaboratorError;

/// Parameters for a new API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Name of the owning secret, used to label the key.
    pub secret_name: String,
    /// Service ID to reuse; a new one is created when absent.
    pub service_id: Option<String>,
    /// Access groups for a newly created service ID.
    pub access_groups: Vec<String>,
    /// Key lifetime.
    pub ttl_secs: u64,
}

/// A freshly issued API key.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// The key itself.
    pub api_key: String,
    /// Provider identifier of the key.
    pub api_key_id: String,
    /// Owning service ID.
    pub service_id: String,
}

impl std::fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("api_key", &"[REDACTED]")
            .field("api_key_id", &self.api_key_id)
            .field("service_id", &self.service_id)
            .finish()
    }
}

/// Issues and removes IAM API keys.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Sets the API key the provider acts with when managing service IDs
    /// and keys.
    async fn configure(&self, api_key: &str) -> Result<(), CollaboratorError>;

    /// Issues a new API key.
    async fn create_api_key(
        &self,
        request: &CredentialRequest,
    ) -> Result<IssuedCredential, CollaboratorError>;

    /// Deletes an API key. Returns `false` if it did not exist.
    async fn delete_api_key(&self, api_key_id: &str) -> Result<bool, CollaboratorError>;

    /// Deletes a service ID with all its keys. Returns `false` if it did not
    /// exist.
    async fn delete_service_id(&self, service_id: &str) -> Result<bool, CollaboratorError>;
}

/// Provider keeping keys in memory, for development and tests.
#[derive(Default)]
pub struct InMemoryCredentialProvider {
    root_key: RwLock<Option<Zeroizing<String>>>,
    // api_key_id -> service_id
    keys: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for InMemoryCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialProvider").finish_non_exhaustive()
    }
}

impl InMemoryCredentialProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an API key was configured.
    pub async fn is_configured(&self) -> bool {
        self.root_key.read().await.is_some()
    }

    /// Whether the key is still live.
    pub async fn has_key(&self, api_key_id: &str) -> bool {
        self.keys.read().await.contains_key(api_key_id)
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentialProvider {
    async fn configure(&self, api_key: &str) -> Result<(), CollaboratorError> {
        if api_key.is_empty() {
            return Err(CollaboratorError("api key cannot be empty".into()));
        }
        *self.root_key.write().await = Some(Zeroizing::new(api_key.to_string()));
        Ok(())
    }

    async fn create_api_key(
        &self,
        request: &CredentialRequest,
    ) -> Result<IssuedCredential, CollaboratorError> {
        if !self.is_configured().await {
            return Err(CollaboratorError("no API key configured".into()));
        }
        if request.ttl_secs == 0 {
            return Err(CollaboratorError("ttl must be positive".into()));
        }

        let service_id = request
            .service_id
            .clone()
            .unwrap_or_else(|| format!("ServiceId-{}", Uuid::new_v4()));
        let api_key_id = format!("ApiKey-{}", Uuid::new_v4());

        self.keys
            .write()
            .await
            .insert(api_key_id.clone(), service_id.clone());

        debug!(secret = %request.secret_name, api_key_id = %api_key_id, "API key issued");
        Ok(IssuedCredential {
            api_key: random::generate_api_key().to_string(),
            api_key_id,
            service_id,
        })
    }

    async fn delete_api_key(&self, api_key_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.keys.write().await.remove(api_key_id).is_some())
    }

    async fn delete_service_id(&self, service_id: &str) -> Result<bool, CollaboratorError> {
        let mut keys = self.keys.write().await;
        let before = keys.len();
        keys.retain(|_, owner| owner != service_id);
        Ok(keys.len() != before)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn request(service_id: Option<&str>) -> CredentialRequest {
        CredentialRequest {
            secret_name: "ci-deployer".into(),
            service_id: service_id.map(String::from),
            access_groups: vec!["deployers".into()],
            ttl_secs: 3600,
        }
    }

    async fn configured() -> InMemoryCredentialProvider {
        let provider = InMemoryCredentialProvider::new();
        provider.configure("root-api-key").await.unwrap();
        provider
    }

    #[tokio::test]
    async fn test_issue_requires_configuration() {
        let provider = InMemoryCredentialProvider::new();
        assert!(provider.create_api_key(&request(None)).await.is_err());
        assert!(provider.configure("").await.is_err());

        provider.configure("root-api-key").await.unwrap();
        assert!(provider.is_configured().await);
        assert!(provider.create_api_key(&request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_issue_and_delete_key() {
        let provider = configured().await;
        let issued = provider.create_api_key(&request(None)).await.unwrap();

        assert_eq!(issued.api_key.len(), random::API_KEY_LENGTH);
        assert!(issued.service_id.starts_with("ServiceId-"));
        assert!(provider.has_key(&issued.api_key_id).await);

        assert!(provider.delete_api_key(&issued.api_key_id).await.unwrap());
        assert!(!provider.delete_api_key(&issued.api_key_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_service_id_removes_its_keys() {
        let provider = configured().await;
        let a = provider.create_api_key(&request(Some("svc-1"))).await.unwrap();
        let b = provider.create_api_key(&request(Some("svc-1"))).await.unwrap();
        let c = provider.create_api_key(&request(Some("svc-2"))).await.unwrap();

        assert!(provider.delete_service_id("svc-1").await.unwrap());
        assert!(!provider.has_key(&a.api_key_id).await);
        assert!(!provider.has_key(&b.api_key_id).await);
        assert!(provider.has_key(&c.api_key_id).await);
        assert!(!provider.delete_service_id("svc-1").await.unwrap());
    }

    #[test]
    fn test_debug_hides_key() {
        let issued = IssuedCredential {
            api_key: "topsecret".into(),
            api_key_id: "ApiKey-1".into(),
            service_id: "svc".into(),
        };
        assert!(!format!("{issued:?}").contains("topsecret"));
    }
}
