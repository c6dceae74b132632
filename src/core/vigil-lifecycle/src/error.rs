//! Lifecycle engine error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the lifecycle engine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Secret or secret group not found (or already deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// Version reference did not resolve.
    #[error("version not found: {secret_id} version {version}")]
    VersionNotFound {
        /// Secret ID.
        secret_id: Uuid,
        /// The reference as given by the caller.
        version: String,
    },

    /// `previous` requested on a secret with fewer than two versions.
    #[error("secret {0} has no previous version")]
    NoPreviousVersion(Uuid),

    /// Operation blocked because versions still hold locks.
    #[error("secret {id} is locked ({locks} active locks)")]
    SecretLocked {
        /// Secret ID.
        id: Uuid,
        /// Number of locks held across all versions.
        locks: usize,
    },

    /// Certificate was already revoked.
    #[error("already revoked: {0}")]
    AlreadyRevoked(String),

    /// Credential does not exist or was already deleted.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// Group still referenced by secrets.
    #[error("secret group {id} still contains {secrets} secrets")]
    GroupNotEmpty {
        /// Group ID.
        id: String,
        /// Number of referencing secrets.
        secrets: usize,
    },

    /// Certificate issuance did not complete in time.
    #[error("issuance for secret {id} timed out after {after_secs}s")]
    IssuanceTimeout {
        /// Secret ID.
        id: Uuid,
        /// Configured timeout.
        after_secs: u64,
    },

    /// Collaborator failed to issue a certificate or credential.
    #[error("issuance for secret {id} failed: {reason}")]
    IssuanceFailed {
        /// Secret ID.
        id: Uuid,
        /// Collaborator message.
        reason: String,
    },

    /// Malformed request.
    #[error("validation error: {0}")]
    Validation(String),

    /// A resource with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation not allowed in the secret's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation not supported for the secret type.
    #[error("{operation} is not supported for {secret_type} secrets")]
    UnsupportedOperation {
        /// Operation name.
        operation: &'static str,
        /// Secret type.
        secret_type: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Record encoding error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<vigil_crypto::CryptoError> for LifecycleError {
    fn from(e: vigil_crypto::CryptoError) -> Self {
        LifecycleError::Crypto(e.to_string())
    }
}

impl From<vigil_storage::StorageError> for LifecycleError {
    fn from(e: vigil_storage::StorageError) -> Self {
        LifecycleError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(e: serde_json::Error) -> Self {
        LifecycleError::Serialization(e.to_string())
    }
}

/// Failure reported by a credential provider or certificate authority.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);
