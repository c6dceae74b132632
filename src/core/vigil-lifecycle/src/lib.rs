//! # Vigil Lifecycle
//!
//! Secret lifecycle engine: versions, locks and rotation for seven secret
//! kinds (arbitrary, username/password, IAM credentials, imported, public and
//! private certificates, key/value).
//!
//! ## Features
//!
//! - Append-only version history with `current` / `previous` aliases
//! - Named version locks with exclusive and exclusive-delete modes
//! - Rotation policies and a scheduler for automatic rotation
//! - Background public certificate orders with DNS-01 challenges
//! - Payloads sealed at rest under per-secret derived keys
//! - Per-type engine configuration (certificate authorities, DNS providers,
//!   templates, the IAM API key)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_crypto::MasterKey;
//! use vigil_lifecycle::{
//!     Collaborators, CreateSecretRequest, EngineConfig, LifecycleEngine, SecretKind,
//!     SecretMaterial, SecretPayload,
//! };
//! use vigil_storage::MemoryBackend;
//!
//! # async fn example() -> Result<(), vigil_lifecycle::LifecycleError> {
//! let engine = LifecycleEngine::open(
//!     Arc::new(MemoryBackend::new()),
//!     MasterKey::generate(),
//!     Collaborators::default(),
//!     EngineConfig::default(),
//! )
//! .await?;
//!
//! let secret = engine
//!     .create_secret(CreateSecretRequest::new(
//!         "db-password",
//!         SecretKind::Arbitrary,
//!         SecretMaterial::Supplied(SecretPayload::Arbitrary {
//!             payload: "hunter2".into(),
//!         }),
//!     ))
//!     .await?;
//! println!("created {}", secret.metadata.id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod configuration;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod groups;
pub mod issuance;
pub mod locks;
pub mod model;
pub mod policy;
pub mod record;
pub mod scheduler;
pub mod sealing;
pub mod versions;
pub mod views;

pub use authority::{CertificateAuthority, DevCertificateAuthority};
pub use configuration::{
    ConfigElement, Configuration, ConfigurationUpdate, IamConfiguration, PrivateCertConfiguration,
    PublicCertConfiguration,
};
pub use credentials::{CredentialProvider, InMemoryCredentialProvider};
pub use engine::{
    Collaborators, CreateSecretRequest, CredentialRef, EngineConfig, LifecycleEngine,
    MetadataUpdate, RotateRequest, ScheduledOutcome, SecretFilter, SecretMaterial,
};
pub use error::{CollaboratorError, LifecycleError};
pub use groups::{GroupUpdate, SecretGroup, DEFAULT_GROUP_ID};
pub use locks::{Lock, LockMode, LockSpec};
pub use model::{
    Page, Pagination, SecretKind, SecretPayload, SecretState, SecretType, DEFAULT_PAGE_LIMIT,
    MAX_PAGE_LIMIT,
};
pub use policy::{RotationPolicy, RotationStatus, RotationUnit};
pub use scheduler::{RotationScheduler, TickReport};
pub use versions::{VersionAlias, VersionRef};
pub use views::{
    PolicyView, SecretMetadata, SecretView, VersionLocks, VersionMetadata, VersionView, Versions,
};
