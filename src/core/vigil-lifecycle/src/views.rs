//! Read models returned by the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::locks::Lock;
use crate::model::{SecretKind, SecretPayload, SecretState};
use crate::policy::{RotationPolicy, RotationStatus};
use crate::record::SecretRecord;
use crate::versions::{CredentialInfo, Validity, VersionAlias, VersionRecord};

/// Secret metadata without any payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretMetadata {
    /// Secret ID.
    pub id: Uuid,
    /// Name.
    pub name: String,
    /// Free text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Kind with its attributes; serialised inline with `secret_type`.
    #[serde(flatten)]
    pub kind: SecretKind,
    /// Owning group.
    pub secret_group_id: String,
    /// Labels.
    pub labels: Vec<String>,
    /// Custom metadata.
    pub custom_metadata: Map<String, Value>,
    /// Lifecycle state.
    pub state: SecretState,
    /// Human readable state.
    pub state_description: &'static str,
    /// Creator.
    pub created_by: String,
    /// Creation timestamp.
    pub creation_date: DateTime<Utc>,
    /// Last update timestamp.
    pub last_update_date: DateTime<Utc>,
    /// Caller chosen expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Next automatic rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_rotation_date: Option<DateTime<Utc>>,
    /// Rotation policy.
    pub rotation: RotationPolicy,
    /// Rotation status.
    pub rotation_status: RotationStatus,
    /// Secret-level revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<DateTime<Utc>>,
    /// Number of versions.
    pub versions_total: usize,
    /// Number of locks across versions.
    pub locks_total: usize,
}

impl SecretMetadata {
    /// Builds the view of `record`.
    pub fn new(record: &SecretRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            description: record.description.clone(),
            kind: record.kind.clone(),
            secret_group_id: record.secret_group_id.clone(),
            labels: record.labels.clone(),
            custom_metadata: record.custom_metadata.clone(),
            state: record.state,
            state_description: record.state.description(),
            created_by: record.created_by.clone(),
            creation_date: record.creation_date,
            last_update_date: record.last_update_date,
            expiration_date: record.expiration_date,
            next_rotation_date: record.policy.status().next_rotation_date(),
            rotation: record.policy.policy().clone(),
            rotation_status: record.policy.status().clone(),
            revocation_time: record.revocation_time,
            versions_total: record.versions.len(),
            locks_total: record.locks.total(),
        }
    }
}

/// Certificate facts of a version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateView {
    /// Validity window.
    pub validity: Validity,
    /// Serial number.
    pub serial_number: String,
    /// Revocation as Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<i64>,
    /// Revocation as RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time_rfc3339: Option<DateTime<Utc>>,
}

/// Version metadata without payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionMetadata {
    /// Version ID.
    pub id: Uuid,
    /// Owning secret.
    pub secret_id: Uuid,
    /// `current` / `previous`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<VersionAlias>,
    /// Creation timestamp.
    pub creation_date: DateTime<Utc>,
    /// Creator.
    pub created_by: String,
    /// Produced by the scheduler.
    pub auto_rotated: bool,
    /// Whether the payload is still stored.
    pub payload_available: bool,
    /// Custom metadata of the version.
    pub version_custom_metadata: Map<String, Value>,
    /// Locks held on the version.
    pub locks_total: usize,
    /// Certificate facts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateView>,
    /// IAM credential facts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialInfo>,
}

impl VersionMetadata {
    /// Builds the view of `version` within `record`.
    pub fn new(record: &SecretRecord, version: &VersionRecord) -> Self {
        Self {
            id: version.id,
            secret_id: record.id,
            alias: record.versions.alias_of(version.id),
            creation_date: version.creation_date,
            created_by: version.created_by.clone(),
            auto_rotated: version.auto_rotated,
            payload_available: version.payload_available(),
            version_custom_metadata: version.custom_metadata.clone(),
            locks_total: record.locks.count(version.id),
            certificate: version.certificate.as_ref().map(|c| CertificateView {
                validity: c.validity,
                serial_number: c.serial_number.clone(),
                revocation_time: c.revocation_time.map(|t| t.timestamp()),
                revocation_time_rfc3339: c.revocation_time,
            }),
            credential: version.credential.clone(),
        }
    }
}

/// A version with its opened payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionView {
    /// Metadata.
    #[serde(flatten)]
    pub metadata: VersionMetadata,
    /// Payload; absent once purged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<SecretPayload>,
}

/// A secret with its current version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretView {
    /// Secret metadata.
    #[serde(flatten)]
    pub metadata: SecretMetadata,
    /// Current version; absent until a certificate is issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionView>,
}

impl SecretView {
    /// Payload of the current version.
    pub fn payload(&self) -> Option<&SecretPayload> {
        self.version.as_ref().and_then(|v| v.payload.as_ref())
    }
}

/// Locks of one version after a lock or unlock call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionLocks {
    /// Secret ID.
    pub secret_id: Uuid,
    /// Version ID.
    pub version_id: Uuid,
    /// Version alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<VersionAlias>,
    /// Locks in insertion order.
    pub locks: Vec<Lock>,
}

/// Rotation policy with its status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyView {
    /// Secret ID.
    pub secret_id: Uuid,
    /// Policy.
    pub rotation: RotationPolicy,
    /// Status.
    pub status: RotationStatus,
}

/// Versions of a secret, newest first.
///
/// Iterates over a snapshot taken when the listing was requested; later
/// rotations do not show up. A clone starts over from the newest version.
#[derive(Debug)]
pub struct Versions {
    record: Arc<SecretRecord>,
    next: usize,
}

impl Versions {
    pub(crate) fn new(record: Arc<SecretRecord>) -> Self {
        Self { record, next: 0 }
    }
}

impl Clone for Versions {
    fn clone(&self) -> Self {
        Self::new(self.record.clone())
    }
}

impl Iterator for Versions {
    type Item = VersionMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        let version = self.record.versions.nth_newest(self.next)?;
        self.next += 1;
        Some(VersionMetadata::new(&self.record, version))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.record.versions.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Versions {}
