//! Append-only version history of a single secret.
//!
//! Versions are kept oldest-first. Aliases are derived from position: the
//! last version is `current`, the one before it `previous`, so appending a
//! version shifts both aliases in one step and no two versions can ever claim
//! the same alias.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::LifecycleError;

/// Alias carried by one of the two newest versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionAlias {
    /// Newest version.
    Current,
    /// Version immediately before `current`.
    Previous,
}

/// How a caller addresses a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionRef {
    /// Explicit version ID.
    Id(Uuid),
    /// The `current` alias.
    Current,
    /// The `previous` alias.
    Previous,
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRef::Id(id) => write!(f, "{id}"),
            VersionRef::Current => f.write_str("current"),
            VersionRef::Previous => f.write_str("previous"),
        }
    }
}

impl FromStr for VersionRef {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(VersionRef::Current),
            "previous" => Ok(VersionRef::Previous),
            other => Uuid::parse_str(other).map(VersionRef::Id).map_err(|_| {
                LifecycleError::Validation(format!(
                    "version must be a UUID, 'current' or 'previous': {other}"
                ))
            }),
        }
    }
}

/// Validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
}

/// Certificate facts recorded next to a sealed certificate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Validity window.
    pub validity: Validity,
    /// Colon separated serial number.
    pub serial_number: String,
    /// When the certificate was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<DateTime<Utc>>,
}

/// IAM credential facts recorded next to a sealed API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInfo {
    /// Provider identifier of the API key.
    pub api_key_id: String,
    /// Owning service ID.
    pub service_id: String,
    /// Set once the key was removed through the provider.
    #[serde(default)]
    pub credentials_deleted: bool,
}

/// One immutable version of a secret.
///
/// Only the payload can be purged and only the revocation and credential
/// flags and the custom metadata change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Version ID.
    pub id: Uuid,
    /// Creation timestamp.
    pub creation_date: DateTime<Utc>,
    /// Creator.
    pub created_by: String,
    /// Whether the rotation scheduler produced this version.
    pub auto_rotated: bool,
    /// Caller supplied metadata.
    #[serde(default)]
    pub custom_metadata: Map<String, Value>,
    /// `base64(nonce || ciphertext)`; `None` once purged.
    #[serde(default)]
    pub sealed_payload: Option<String>,
    /// Certificate facts, for certificate kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateInfo>,
    /// Credential facts, for IAM credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialInfo>,
}

impl VersionRecord {
    /// Whether the sealed payload is still present.
    pub fn payload_available(&self) -> bool {
        self.sealed_payload.is_some()
    }

    /// Drops the sealed payload. Returns `false` if it was already gone.
    pub fn purge_payload(&mut self) -> bool {
        self.sealed_payload.take().is_some()
    }

    /// Whether the version's certificate was revoked.
    pub fn is_revoked(&self) -> bool {
        self.certificate
            .as_ref()
            .is_some_and(|c| c.revocation_time.is_some())
    }
}

/// Append-only sequence of versions, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionStore {
    versions: Vec<VersionRecord>,
}

impl VersionStore {
    /// Appends `version`, making it `current` and demoting the old `current`
    /// to `previous`.
    pub fn append(&mut self, version: VersionRecord) -> &VersionRecord {
        self.versions.push(version);
        &self.versions[self.versions.len() - 1]
    }

    /// Number of versions.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether no version exists yet.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The `current` version.
    pub fn current(&self) -> Option<&VersionRecord> {
        self.versions.last()
    }

    /// The `previous` version.
    pub fn previous(&self) -> Option<&VersionRecord> {
        self.versions.len().checked_sub(2).map(|i| &self.versions[i])
    }

    /// Alias of the version with `id`, if it carries one.
    pub fn alias_of(&self, id: Uuid) -> Option<VersionAlias> {
        let pos = self.position(id)?;
        match self.versions.len() - pos {
            1 => Some(VersionAlias::Current),
            2 => Some(VersionAlias::Previous),
            _ => None,
        }
    }

    /// Resolves a reference to a version of secret `secret_id`.
    pub fn resolve(
        &self,
        secret_id: Uuid,
        version: VersionRef,
    ) -> Result<&VersionRecord, LifecycleError> {
        let pos = self.resolve_position(secret_id, version)?;
        Ok(&self.versions[pos])
    }

    /// Mutable variant of [`VersionStore::resolve`].
    pub fn resolve_mut(
        &mut self,
        secret_id: Uuid,
        version: VersionRef,
    ) -> Result<&mut VersionRecord, LifecycleError> {
        let pos = self.resolve_position(secret_id, version)?;
        Ok(&mut self.versions[pos])
    }

    /// The version appended immediately before `id`.
    pub fn preceding(&self, id: Uuid) -> Option<&VersionRecord> {
        let pos = self.position(id)?;
        pos.checked_sub(1).map(|i| &self.versions[i])
    }

    /// Versions newest first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &VersionRecord> {
        self.versions.iter().rev()
    }

    /// Versions by position from the newest (`0` is `current`).
    pub fn nth_newest(&self, n: usize) -> Option<&VersionRecord> {
        self.versions.len().checked_sub(n + 1).map(|i| &self.versions[i])
    }

    /// Mutable access to every version, oldest first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VersionRecord> {
        self.versions.iter_mut()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.versions.iter().position(|v| v.id == id)
    }

    fn resolve_position(&self, secret_id: Uuid, version: VersionRef) -> Result<usize, LifecycleError> {
        let not_found = || LifecycleError::VersionNotFound {
            secret_id,
            version: version.to_string(),
        };
        match version {
            VersionRef::Id(id) => self.position(id).ok_or_else(not_found),
            VersionRef::Current => self.versions.len().checked_sub(1).ok_or_else(not_found),
            VersionRef::Previous => self
                .versions
                .len()
                .checked_sub(2)
                .ok_or(LifecycleError::NoPreviousVersion(secret_id)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn version(n: u8) -> VersionRecord {
        VersionRecord {
            id: Uuid::new_v4(),
            creation_date: Utc::now(),
            created_by: format!("user-{n}"),
            auto_rotated: false,
            custom_metadata: Map::new(),
            sealed_payload: Some(format!("sealed-{n}")),
            certificate: None,
            credential: None,
        }
    }

    #[test]
    fn test_append_shifts_aliases() {
        let secret = Uuid::new_v4();
        let mut store = VersionStore::default();

        let v1 = store.append(version(1)).id;
        assert_eq!(store.alias_of(v1), Some(VersionAlias::Current));
        assert!(matches!(
            store.resolve(secret, VersionRef::Previous),
            Err(LifecycleError::NoPreviousVersion(id)) if id == secret
        ));

        let v2 = store.append(version(2)).id;
        let v3 = store.append(version(3)).id;
        assert_eq!(store.alias_of(v3), Some(VersionAlias::Current));
        assert_eq!(store.alias_of(v2), Some(VersionAlias::Previous));
        assert_eq!(store.alias_of(v1), None);

        assert_eq!(store.resolve(secret, VersionRef::Current).unwrap().id, v3);
        assert_eq!(store.resolve(secret, VersionRef::Previous).unwrap().id, v2);
        assert_eq!(store.resolve(secret, VersionRef::Id(v1)).unwrap().id, v1);
        assert_eq!(store.preceding(v2).unwrap().id, v1);
        assert!(store.preceding(v1).is_none());
    }

    #[test]
    fn test_resolve_unknown_version() {
        let secret = Uuid::new_v4();
        let mut store = VersionStore::default();
        assert!(matches!(
            store.resolve(secret, VersionRef::Current),
            Err(LifecycleError::VersionNotFound { .. })
        ));

        store.append(version(1));
        let missing = Uuid::new_v4();
        match store.resolve(secret, VersionRef::Id(missing)) {
            Err(LifecycleError::VersionNotFound { version, .. }) => {
                assert_eq!(version, missing.to_string())
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_version_ref_parsing() {
        assert_eq!("current".parse::<VersionRef>().unwrap(), VersionRef::Current);
        assert_eq!("previous".parse::<VersionRef>().unwrap(), VersionRef::Previous);
        let id = Uuid::new_v4();
        assert_eq!(id.to_string().parse::<VersionRef>().unwrap(), VersionRef::Id(id));
        assert!("latest".parse::<VersionRef>().is_err());
    }

    #[test]
    fn test_purge_keeps_metadata() {
        let mut store = VersionStore::default();
        let v1 = store.append(version(1)).id;
        let secret = Uuid::new_v4();

        let record = store.resolve_mut(secret, VersionRef::Id(v1)).unwrap();
        assert!(record.purge_payload());
        assert!(!record.purge_payload());
        assert!(!record.payload_available());
        assert_eq!(record.created_by, "user-1");
    }

    proptest! {
        #[test]
        fn prop_aliases_follow_last_two_appends(count in 1usize..40) {
            let secret = Uuid::new_v4();
            let mut store = VersionStore::default();
            let ids: Vec<Uuid> = (0..count).map(|i| store.append(version(i as u8)).id).collect();

            let currents = ids.iter().filter(|id| store.alias_of(**id) == Some(VersionAlias::Current)).count();
            let previous = ids.iter().filter(|id| store.alias_of(**id) == Some(VersionAlias::Previous)).count();
            prop_assert_eq!(currents, 1);
            prop_assert_eq!(previous, usize::from(count >= 2));

            prop_assert_eq!(store.resolve(secret, VersionRef::Current).unwrap().id, ids[count - 1]);
            if count >= 2 {
                prop_assert_eq!(store.resolve(secret, VersionRef::Previous).unwrap().id, ids[count - 2]);
            }

            let newest_first: Vec<Uuid> = store.iter_newest_first().map(|v| v.id).collect();
            let mut expected = ids.clone();
            expected.reverse();
            prop_assert_eq!(newest_first, expected);
        }
    }
}
