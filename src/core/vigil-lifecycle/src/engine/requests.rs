//! Request types accepted by the engine and their validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::LifecycleError;
use crate::model::{SecretKind, SecretPayload, SecretType};
use crate::policy::RotationPolicy;
use crate::versions::CredentialInfo;

const NAME_MAX: usize = 256;
const LABELS_MAX: usize = 30;
const LABEL_LEN_MAX: usize = 30;

/// Where the material of a new version comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SecretMaterial {
    /// The engine or a collaborator generates it.
    Generate,
    /// The caller supplies a complete payload.
    Supplied(SecretPayload),
    /// The private CA signs the caller's CSR.
    Csr(String),
}

/// Parameters of [`LifecycleEngine::create_secret`](super::LifecycleEngine::create_secret).
#[derive(Debug, Clone)]
pub struct CreateSecretRequest {
    /// Name, unique per group and type.
    pub name: String,
    /// Free text.
    pub description: Option<String>,
    /// Target group; the default group when absent.
    pub secret_group_id: Option<String>,
    /// Labels.
    pub labels: Vec<String>,
    /// Secret metadata.
    pub custom_metadata: Map<String, Value>,
    /// Metadata of the first version.
    pub version_custom_metadata: Map<String, Value>,
    /// Expiry for arbitrary, username_password and kv secrets.
    pub expiration_date: Option<DateTime<Utc>>,
    /// Rotation policy.
    pub rotation: RotationPolicy,
    /// Kind and attributes.
    pub kind: SecretKind,
    /// Initial material.
    pub material: SecretMaterial,
    /// Creator.
    pub created_by: String,
}

impl CreateSecretRequest {
    /// Request with default metadata.
    pub fn new(name: impl Into<String>, kind: SecretKind, material: SecretMaterial) -> Self {
        Self {
            name: name.into(),
            description: None,
            secret_group_id: None,
            labels: Vec::new(),
            custom_metadata: Map::new(),
            version_custom_metadata: Map::new(),
            expiration_date: None,
            rotation: RotationPolicy::default(),
            kind,
            material,
            created_by: "system".into(),
        }
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        let secret_type = self.kind.secret_type();
        validate_name(&self.name)?;
        validate_labels(&self.labels)?;
        validate_kind(&self.kind)?;
        check_material(secret_type, &self.material, true)?;
        validate_expiration(secret_type, self.expiration_date, now)?;
        self.rotation.validate(secret_type)
    }
}

/// Parameters of a rotation.
#[derive(Debug, Clone)]
pub struct RotateRequest {
    /// New material.
    pub material: SecretMaterial,
    /// Overrides the policy's `rotate_keys` for public certificates.
    pub rotate_keys: Option<bool>,
    /// Metadata of the new version.
    pub version_custom_metadata: Map<String, Value>,
    /// Caller.
    pub actor: String,
}

impl RotateRequest {
    /// Rotation to a caller supplied payload.
    pub fn with_payload(payload: SecretPayload, actor: impl Into<String>) -> Self {
        Self {
            material: SecretMaterial::Supplied(payload),
            rotate_keys: None,
            version_custom_metadata: Map::new(),
            actor: actor.into(),
        }
    }

    /// Rotation to generated material.
    pub fn generate(actor: impl Into<String>) -> Self {
        Self {
            material: SecretMaterial::Generate,
            rotate_keys: None,
            version_custom_metadata: Map::new(),
            actor: actor.into(),
        }
    }
}

/// Metadata changes; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetadataUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement labels.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Replacement custom metadata.
    #[serde(default)]
    pub custom_metadata: Option<Map<String, Value>>,
    /// New expiry.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl MetadataUpdate {
    pub(crate) fn validate(
        &self,
        secret_type: SecretType,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        validate_expiration(secret_type, self.expiration_date, now)
    }
}

/// Listing filter; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretFilter {
    /// Allowed types.
    pub secret_types: Vec<SecretType>,
    /// Allowed groups.
    pub groups: Vec<String>,
    /// Labels that must all be present.
    pub labels: Vec<String>,
    /// Case-insensitive substring of the name or a label.
    pub search: Option<String>,
}

impl SecretFilter {
    pub(crate) fn matches(
        &self,
        secret_type: SecretType,
        group: &str,
        name: &str,
        labels: &[String],
    ) -> bool {
        if !self.secret_types.is_empty() && !self.secret_types.contains(&secret_type) {
            return false;
        }
        if !self.groups.is_empty() && !self.groups.iter().any(|g| g == group) {
            return false;
        }
        if !self.labels.iter().all(|l| labels.contains(l)) {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(needle) if !needle.is_empty() => {
                name.to_lowercase().contains(&needle)
                    || labels.iter().any(|l| l.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Identifies the credential to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    /// A single API key.
    ApiKeyId(String),
    /// A service ID and all its keys.
    ServiceId(String),
}

impl CredentialRef {
    pub(crate) fn matches(&self, info: &CredentialInfo) -> bool {
        match self {
            CredentialRef::ApiKeyId(id) => &info.api_key_id == id,
            CredentialRef::ServiceId(id) => &info.service_id == id,
        }
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::ApiKeyId(id) => write!(f, "api key {id}"),
            CredentialRef::ServiceId(id) => write!(f, "service id {id}"),
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if !(2..=NAME_MAX).contains(&name.len()) {
        return Err(LifecycleError::Validation(format!(
            "secret name must be 2-{NAME_MAX} characters"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(LifecycleError::Validation(format!(
            "secret name may only contain letters, digits, '_', '.' and '-': {name}"
        )));
    }
    Ok(())
}

fn validate_labels(labels: &[String]) -> Result<(), LifecycleError> {
    if labels.len() > LABELS_MAX {
        return Err(LifecycleError::Validation(format!(
            "at most {LABELS_MAX} labels are allowed"
        )));
    }
    for label in labels {
        if !(2..=LABEL_LEN_MAX).contains(&label.chars().count())
            || label.chars().any(char::is_whitespace)
        {
            return Err(LifecycleError::Validation(format!(
                "labels must be 2-{LABEL_LEN_MAX} characters without spaces: {label:?}"
            )));
        }
    }
    Ok(())
}

fn validate_expiration(
    secret_type: SecretType,
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    match expiration {
        None => Ok(()),
        Some(_) if !secret_type.supports_expiration() => Err(LifecycleError::Validation(format!(
            "{secret_type} secrets do not accept an expiration date"
        ))),
        Some(date) if date <= now => Err(LifecycleError::Validation(
            "expiration date must be in the future".into(),
        )),
        Some(_) => Ok(()),
    }
}

fn validate_kind(kind: &SecretKind) -> Result<(), LifecycleError> {
    let missing = |field: &str| {
        Err(LifecycleError::Validation(format!(
            "{} secrets require {field}",
            kind.secret_type()
        )))
    };
    match kind {
        SecretKind::IamCredentials(attrs) if attrs.ttl_secs == 0 => missing("a positive ttl"),
        SecretKind::PrivateCert(attrs) if attrs.certificate_template.is_empty() => {
            missing("a certificate template")
        }
        SecretKind::PrivateCert(attrs) if attrs.ttl_secs == 0 => missing("a positive ttl"),
        SecretKind::PublicCert(attrs) if attrs.ca.is_empty() => missing("a CA"),
        SecretKind::PublicCert(attrs) if attrs.dns.is_empty() => missing("a DNS provider"),
        SecretKind::PublicCert(_) | SecretKind::PrivateCert(_)
            if kind
                .certificate_fields()
                .is_some_and(|c| c.common_name.is_empty()) =>
        {
            missing("a common name")
        }
        SecretKind::PublicCert(attrs) if attrs.issuance_info.is_some() => Err(
            LifecycleError::Validation("issuance_info is maintained by the engine".into()),
        ),
        _ => Ok(()),
    }
}

/// Checks that `material` fits `secret_type`. Generated usernames do not
/// exist, so username_password needs a supplied payload on creation.
pub(crate) fn check_material(
    secret_type: SecretType,
    material: &SecretMaterial,
    creating: bool,
) -> Result<(), LifecycleError> {
    use SecretType::*;

    if let SecretMaterial::Supplied(payload) = material {
        if payload.secret_type() != secret_type {
            return Err(LifecycleError::Validation(format!(
                "{} payload supplied for a {secret_type} secret",
                payload.secret_type()
            )));
        }
        validate_payload(payload)?;
    }

    let accepted = match (secret_type, material) {
        (Arbitrary | Kv | ImportedCert | UsernamePassword, SecretMaterial::Supplied(_)) => true,
        (UsernamePassword, SecretMaterial::Generate) => !creating,
        (IamCredentials | PublicCert, SecretMaterial::Generate) => true,
        (PrivateCert, SecretMaterial::Generate | SecretMaterial::Csr(_)) => true,
        _ => false,
    };
    if accepted {
        Ok(())
    } else {
        Err(LifecycleError::Validation(match material {
            SecretMaterial::Generate if secret_type == UsernamePassword => {
                "username_password secrets require a username".to_string()
            }
            SecretMaterial::Generate => format!("{secret_type} secrets require a payload"),
            SecretMaterial::Supplied(_) => {
                format!("{secret_type} secrets are generated and do not accept a payload")
            }
            SecretMaterial::Csr(_) => format!("{secret_type} secrets do not accept a CSR"),
        }))
    }
}

fn validate_payload(payload: &SecretPayload) -> Result<(), LifecycleError> {
    let empty = match payload {
        SecretPayload::Arbitrary { payload } => payload.is_empty(),
        SecretPayload::UsernamePassword { username, .. } => username.is_empty(),
        SecretPayload::ImportedCert(bundle) => bundle.certificate.is_empty(),
        SecretPayload::Kv { data } => data.is_empty(),
        _ => false,
    };
    if empty {
        return Err(LifecycleError::Validation(format!(
            "{} payload must not be empty",
            payload.secret_type()
        )));
    }
    Ok(())
}
