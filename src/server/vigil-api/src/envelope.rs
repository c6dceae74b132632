//! The `{metadata, resources}` envelope shared by requests and responses.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Media types naming what a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    /// Secrets and secret metadata.
    Secret,
    /// Secret versions and version metadata.
    SecretVersion,
    /// Version locks.
    SecretLock,
    /// Rotation policies.
    SecretPolicy,
    /// Secret groups.
    SecretGroup,
    /// Secrets engine configuration.
    Config,
    /// Errors.
    Error,
}

impl CollectionType {
    /// Wire value of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Secret => "application/vnd.ibm.secrets-manager.secret+json",
            CollectionType::SecretVersion => {
                "application/vnd.ibm.secrets-manager.secret.version+json"
            }
            CollectionType::SecretLock => "application/vnd.ibm.secrets-manager.secret.lock+json",
            CollectionType::SecretPolicy => {
                "application/vnd.ibm.secrets-manager.secret.policy+json"
            }
            CollectionType::SecretGroup => "application/vnd.ibm.secrets-manager.secret.group+json",
            CollectionType::Config => "application/vnd.ibm.secrets-manager.config+json",
            CollectionType::Error => "application/vnd.ibm.secrets-manager.error+json",
        }
    }
}

/// Envelope header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Media type of the resources.
    #[serde(default)]
    pub collection_type: String,
    /// Number of resources; for listings, the number of matches before
    /// pagination.
    #[serde(default)]
    pub collection_total: usize,
}

/// A typed collection of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection<T> {
    /// Envelope header.
    #[serde(default)]
    pub metadata: CollectionMetadata,
    /// The resources.
    pub resources: Vec<T>,
}

impl<T> Collection<T> {
    /// Collection holding `resources`.
    pub fn new(collection_type: CollectionType, resources: Vec<T>) -> Self {
        Self::with_total(collection_type, resources.len(), resources)
    }

    /// Collection holding one resource.
    pub fn one(collection_type: CollectionType, resource: T) -> Self {
        Self::new(collection_type, vec![resource])
    }

    /// Page of a listing with `total` matches overall.
    pub fn with_total(collection_type: CollectionType, total: usize, resources: Vec<T>) -> Self {
        Self {
            metadata: CollectionMetadata {
                collection_type: collection_type.as_str().to_string(),
                collection_total: total,
            },
            resources,
        }
    }

    /// The single resource of a request body.
    pub fn into_single(self) -> Result<T, ApiError> {
        let count = self.resources.len();
        let mut resources = self.resources.into_iter();
        match (resources.next(), count) {
            (Some(resource), 1) => Ok(resource),
            _ => Err(ApiError::BadRequest(format!(
                "expected exactly one resource, got {count}"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(Collection::one(CollectionType::SecretGroup, "g")).unwrap();
        assert_eq!(
            body["metadata"]["collection_type"],
            "application/vnd.ibm.secrets-manager.secret.group+json"
        );
        assert_eq!(body["metadata"]["collection_total"], 1);
        assert_eq!(body["resources"][0], "g");
    }

    #[test]
    fn test_request_must_hold_one_resource() {
        let empty: Collection<u8> = serde_json::from_str(r#"{"resources": []}"#).unwrap();
        assert!(empty.into_single().is_err());

        let two: Collection<u8> = serde_json::from_str(r#"{"resources": [1, 2]}"#).unwrap();
        assert!(two.into_single().is_err());

        let one: Collection<u8> = serde_json::from_str(r#"{"resources": [7]}"#).unwrap();
        assert_eq!(one.into_single().unwrap(), 7);
    }
}
