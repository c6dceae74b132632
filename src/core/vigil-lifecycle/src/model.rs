//! Secret kinds, payloads and lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LifecycleError;

/// Default number of items returned by list operations.
pub const DEFAULT_PAGE_LIMIT: usize = 200;

/// Upper bound on the page size a caller may request.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// The seven kinds of secret the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    /// Opaque string payload.
    Arbitrary,
    /// Username and password pair.
    UsernamePassword,
    /// IAM API key issued by the credential provider.
    IamCredentials,
    /// Certificate imported by the caller.
    ImportedCert,
    /// Certificate ordered from a public CA.
    PublicCert,
    /// Certificate issued by the private CA.
    PrivateCert,
    /// JSON key/value object.
    Kv,
}

impl SecretType {
    /// All secret types, in declaration order.
    pub const ALL: [SecretType; 7] = [
        SecretType::Arbitrary,
        SecretType::UsernamePassword,
        SecretType::IamCredentials,
        SecretType::ImportedCert,
        SecretType::PublicCert,
        SecretType::PrivateCert,
        SecretType::Kv,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Arbitrary => "arbitrary",
            SecretType::UsernamePassword => "username_password",
            SecretType::IamCredentials => "iam_credentials",
            SecretType::ImportedCert => "imported_cert",
            SecretType::PublicCert => "public_cert",
            SecretType::PrivateCert => "private_cert",
            SecretType::Kv => "kv",
        }
    }

    /// Whether a rotation policy may enable automatic rotation.
    pub fn supports_auto_rotation(&self) -> bool {
        matches!(
            self,
            SecretType::UsernamePassword
                | SecretType::IamCredentials
                | SecretType::PrivateCert
                | SecretType::PublicCert
        )
    }

    /// Whether the secret may carry a caller-defined expiration date.
    pub fn supports_expiration(&self) -> bool {
        matches!(
            self,
            SecretType::Arbitrary | SecretType::UsernamePassword | SecretType::Kv
        )
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LifecycleError::Validation(format!("unknown secret type: {s}")))
    }
}

/// NIST SP 800-57 key state of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SecretState {
    /// Waiting for the first certificate issuance.
    PreActivation,
    /// Usable.
    Active,
    /// Temporarily disabled by an administrator.
    Suspended,
    /// Expired or retired; cannot return to active.
    Deactivated,
    /// Revoked or deleted. Terminal.
    Destroyed,
}

impl SecretState {
    /// Short human readable name.
    pub fn description(&self) -> &'static str {
        match self {
            SecretState::PreActivation => "Pre-activation",
            SecretState::Active => "Active",
            SecretState::Suspended => "Suspended",
            SecretState::Deactivated => "Deactivated",
            SecretState::Destroyed => "Destroyed",
        }
    }

    /// Whether `next` is reachable from this state in one step.
    pub fn can_transition_to(&self, next: SecretState) -> bool {
        use SecretState::*;
        matches!(
            (self, next),
            (PreActivation, Active)
                | (PreActivation, Destroyed)
                | (Active, Suspended)
                | (Active, Deactivated)
                | (Active, Destroyed)
                | (Suspended, Active)
                | (Suspended, Deactivated)
                | (Suspended, Destroyed)
                | (Deactivated, Destroyed)
        )
    }
}

impl From<SecretState> for u8 {
    fn from(state: SecretState) -> Self {
        match state {
            SecretState::PreActivation => 0,
            SecretState::Active => 1,
            SecretState::Suspended => 2,
            SecretState::Deactivated => 3,
            SecretState::Destroyed => 5,
        }
    }
}

impl TryFrom<u8> for SecretState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecretState::PreActivation),
            1 => Ok(SecretState::Active),
            2 => Ok(SecretState::Suspended),
            3 => Ok(SecretState::Deactivated),
            5 => Ok(SecretState::Destroyed),
            other => Err(format!("invalid secret state: {other}")),
        }
    }
}

// ============================================================================
// Kind attributes
// ============================================================================

/// Fields shared by every certificate-bearing kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFields {
    /// Subject common name.
    #[serde(default)]
    pub common_name: String,
    /// Subject alternative names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_names: Vec<String>,
    /// Key algorithm, e.g. `RSA2048` or `EC256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_algorithm: Option<String>,
}

/// Static attributes of an IAM credentials secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamCredentialsAttributes {
    /// Lifetime of each generated API key.
    pub ttl_secs: u64,
    /// Access groups the service ID is added to.
    #[serde(default)]
    pub access_groups: Vec<String>,
    /// Existing service ID to issue keys for; a new one is created when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

/// How DNS-01 challenges of a public certificate are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsMode {
    /// The DNS provider integration publishes records itself.
    #[default]
    Automatic,
    /// An operator publishes the TXT records and then asks for validation.
    Manual,
}

/// Progress of a public certificate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceState {
    /// Order sent to the CA.
    Ordered,
    /// Waiting for an operator to publish DNS records.
    ChallengesPending,
    /// Records verified, order sent.
    ChallengesValidated,
    /// Records could not be verified.
    ValidationFailed,
    /// Certificate issued.
    Issued,
    /// The CA rejected the order.
    Failed,
    /// The CA did not answer in time.
    TimedOut,
}

impl IssuanceState {
    /// Whether an order is still outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            IssuanceState::Ordered
                | IssuanceState::ChallengesPending
                | IssuanceState::ChallengesValidated
        )
    }
}

/// A DNS-01 challenge that must be published before issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsChallenge {
    /// Domain being validated.
    pub domain: String,
    /// Name of the TXT record.
    pub txt_record_name: String,
    /// Expected TXT record value.
    pub txt_record_value: String,
    /// When the challenge expires.
    pub expiration: DateTime<Utc>,
}

/// Order tracking for a public certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceInfo {
    /// Current order state.
    pub state: IssuanceState,
    /// When the order was started.
    pub ordered_on: DateTime<Utc>,
    /// Pending DNS challenges (manual mode).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<DnsChallenge>,
    /// When the DNS challenges were last validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_challenge_validation_time: Option<DateTime<Utc>>,
    /// Whether the order was started by the rotation scheduler.
    pub auto_rotated: bool,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Static attributes of a public certificate secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicCertAttributes {
    /// Shared certificate fields.
    #[serde(flatten)]
    pub cert: CertificateFields,
    /// Name of the configured CA.
    pub ca: String,
    /// Name of the configured DNS provider.
    pub dns: String,
    /// Challenge handling mode.
    #[serde(default)]
    pub dns_mode: DnsMode,
    /// Return the intermediate bundled with the leaf certificate.
    #[serde(default)]
    pub bundle_certs: bool,
    /// State of the latest order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuance_info: Option<IssuanceInfo>,
}

/// Static attributes of a private certificate secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateCertAttributes {
    /// Shared certificate fields.
    #[serde(flatten)]
    pub cert: CertificateFields,
    /// Certificate template on the private CA.
    pub certificate_template: String,
    /// Requested certificate lifetime.
    pub ttl_secs: u64,
}

/// The kind of a secret together with its kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum SecretKind {
    /// Opaque string.
    Arbitrary,
    /// Username and password.
    UsernamePassword,
    /// IAM API key.
    IamCredentials(IamCredentialsAttributes),
    /// Imported certificate.
    ImportedCert(CertificateFields),
    /// Publicly ordered certificate.
    PublicCert(PublicCertAttributes),
    /// Privately issued certificate.
    PrivateCert(PrivateCertAttributes),
    /// JSON key/value object.
    Kv,
}

impl SecretKind {
    /// The discriminating secret type.
    pub fn secret_type(&self) -> SecretType {
        match self {
            SecretKind::Arbitrary => SecretType::Arbitrary,
            SecretKind::UsernamePassword => SecretType::UsernamePassword,
            SecretKind::IamCredentials(_) => SecretType::IamCredentials,
            SecretKind::ImportedCert(_) => SecretType::ImportedCert,
            SecretKind::PublicCert(_) => SecretType::PublicCert,
            SecretKind::PrivateCert(_) => SecretType::PrivateCert,
            SecretKind::Kv => SecretType::Kv,
        }
    }

    /// Shared certificate fields, for certificate kinds.
    pub fn certificate_fields(&self) -> Option<&CertificateFields> {
        match self {
            SecretKind::ImportedCert(cert) => Some(cert),
            SecretKind::PublicCert(attrs) => Some(&attrs.cert),
            SecretKind::PrivateCert(attrs) => Some(&attrs.cert),
            _ => None,
        }
    }

    /// Issuance tracking of a public certificate.
    pub fn issuance_info(&self) -> Option<&IssuanceInfo> {
        match self {
            SecretKind::PublicCert(attrs) => attrs.issuance_info.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Certificate material stored in a version.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateBundle {
    /// PEM certificate.
    pub certificate: String,
    /// PEM private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// PEM intermediate chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<String>,
    /// PEM issuing CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuing_ca: Option<String>,
}

/// The secret material of one version.
///
/// Only ever persisted in sealed form.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "secret_type", rename_all = "snake_case")]
pub enum SecretPayload {
    /// Opaque string.
    Arbitrary {
        /// The value.
        payload: String,
    },
    /// Username and password. An empty password asks the engine to generate one.
    UsernamePassword {
        /// Username.
        username: String,
        /// Password.
        #[serde(default)]
        password: String,
    },
    /// IAM API key.
    IamCredentials {
        /// The API key.
        api_key: String,
        /// Provider identifier of the key.
        api_key_id: String,
        /// Service ID that owns the key.
        service_id: String,
    },
    /// Imported certificate.
    ImportedCert(CertificateBundle),
    /// Publicly ordered certificate.
    PublicCert(CertificateBundle),
    /// Privately issued certificate.
    PrivateCert(CertificateBundle),
    /// JSON object.
    Kv {
        /// The object.
        data: Map<String, Value>,
    },
}

impl SecretPayload {
    /// The secret type this payload belongs to.
    pub fn secret_type(&self) -> SecretType {
        match self {
            SecretPayload::Arbitrary { .. } => SecretType::Arbitrary,
            SecretPayload::UsernamePassword { .. } => SecretType::UsernamePassword,
            SecretPayload::IamCredentials { .. } => SecretType::IamCredentials,
            SecretPayload::ImportedCert(_) => SecretType::ImportedCert,
            SecretPayload::PublicCert(_) => SecretType::PublicCert,
            SecretPayload::PrivateCert(_) => SecretType::PrivateCert,
            SecretPayload::Kv { .. } => SecretType::Kv,
        }
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("secret_type", &self.secret_type())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Offset/limit window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Items to skip.
    pub offset: usize,
    /// Maximum items to return.
    pub limit: usize,
}

impl Pagination {
    /// Builds a window, applying `default_limit` when no limit is given.
    pub fn new(
        offset: Option<usize>,
        limit: Option<usize>,
        default_limit: usize,
    ) -> Result<Self, LifecycleError> {
        let limit = limit.unwrap_or(default_limit);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(LifecycleError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(Self {
            offset: offset.unwrap_or(0),
            limit,
        })
    }

    /// Applies the window to an already filtered sequence.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// One page of results plus the number of matches before pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in the window.
    pub items: Vec<T>,
    /// Total number of matching items.
    pub total: usize,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_type_round_trips_names() {
        for ty in SecretType::ALL {
            assert_eq!(ty.as_str().parse::<SecretType>().unwrap(), ty);
            assert_eq!(
                serde_json::to_value(ty).unwrap(),
                Value::String(ty.to_string())
            );
        }
        assert!("certificate".parse::<SecretType>().is_err());
    }

    #[test]
    fn test_state_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&SecretState::Destroyed).unwrap(), "5");
        let state: SecretState = serde_json::from_str("2").unwrap();
        assert_eq!(state, SecretState::Suspended);
        assert!(serde_json::from_str::<SecretState>("4").is_err());
    }

    #[test]
    fn test_state_machine() {
        assert!(SecretState::Active.can_transition_to(SecretState::Suspended));
        assert!(SecretState::Suspended.can_transition_to(SecretState::Active));
        assert!(SecretState::Deactivated.can_transition_to(SecretState::Destroyed));
        assert!(!SecretState::Deactivated.can_transition_to(SecretState::Active));
        assert!(!SecretState::Destroyed.can_transition_to(SecretState::Active));
        assert!(!SecretState::Active.can_transition_to(SecretState::PreActivation));
    }

    #[test]
    fn test_kind_is_tagged_by_secret_type() {
        let kind = SecretKind::PrivateCert(PrivateCertAttributes {
            cert: CertificateFields {
                common_name: "internal.example.com".into(),
                ..Default::default()
            },
            certificate_template: "default".into(),
            ttl_secs: 3600,
        });

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["secret_type"], "private_cert");
        assert_eq!(json["common_name"], "internal.example.com");

        let back: SecretKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
        assert_eq!(back.secret_type(), SecretType::PrivateCert);
    }

    #[test]
    fn test_payload_debug_is_redacted() {
        let payload = SecretPayload::UsernamePassword {
            username: "admin".into(),
            password: "hunter22".into(),
        };
        let debug = format!("{payload:?}");
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("UsernamePassword"));
    }

    #[test]
    fn test_pagination_bounds() {
        let page = Pagination::new(None, None, DEFAULT_PAGE_LIMIT).unwrap();
        assert_eq!(page.limit, 200);
        assert!(Pagination::new(None, Some(0), DEFAULT_PAGE_LIMIT).is_err());
        assert!(Pagination::new(None, Some(1001), DEFAULT_PAGE_LIMIT).is_err());

        let page = Pagination::new(Some(2), Some(2), DEFAULT_PAGE_LIMIT).unwrap();
        assert_eq!(page.apply(1..=10), vec![3, 4]);
    }
}
