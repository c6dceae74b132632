//! Certificate authority seam.
//!
//! Key generation and X.509 encoding belong to the PKI collaborator; the
//! engine only sees issued material plus validity and serial number.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use vigil_crypto::random;

use crate::error::CollaboratorError;
use crate::model::{CertificateFields, DnsChallenge};

/// Request for a certificate from the private CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateCertRequest {
    /// Subject fields.
    pub cert: CertificateFields,
    /// CA template.
    pub certificate_template: String,
    /// Certificate lifetime.
    pub ttl_secs: u64,
    /// Caller supplied CSR; the CA generates a key when absent.
    pub csr: Option<String>,
}

/// Request for a certificate from a public ACME CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicCertRequest {
    /// Subject fields.
    pub cert: CertificateFields,
    /// Configured CA name.
    pub ca: String,
    /// Configured DNS provider name.
    pub dns: String,
    /// Return the intermediate bundled with the leaf.
    pub bundle_certs: bool,
    /// Generate a new private key instead of reusing the previous one.
    pub rotate_keys: bool,
}

/// Certificate material returned by the CA.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM certificate.
    pub certificate: String,
    /// PEM private key, when the CA generated one.
    pub private_key: Option<String>,
    /// PEM intermediate chain.
    pub intermediate: Option<String>,
    /// PEM issuing CA.
    pub issuing_ca: Option<String>,
    /// Colon separated serial.
    pub serial_number: String,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("serial_number", &self.serial_number)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Issues and revokes certificates.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issues a certificate from the private CA.
    async fn issue_private(
        &self,
        request: &PrivateCertRequest,
    ) -> Result<IssuedCertificate, CollaboratorError>;

    /// Computes the DNS-01 challenges an operator must publish.
    async fn prepare_challenges(
        &self,
        request: &PublicCertRequest,
    ) -> Result<Vec<DnsChallenge>, CollaboratorError>;

    /// Checks whether the challenges are visible in DNS.
    async fn validate_challenges(
        &self,
        challenges: &[DnsChallenge],
    ) -> Result<bool, CollaboratorError>;

    /// Orders a public certificate. May take minutes.
    async fn order_public(
        &self,
        request: &PublicCertRequest,
    ) -> Result<IssuedCertificate, CollaboratorError>;

    /// Revokes the certificate with `serial_number`.
    async fn revoke(&self, serial_number: &str) -> Result<(), CollaboratorError>;
}

/// Settings of the development CA.
#[derive(Debug, Clone)]
pub struct DevAuthorityConfig {
    /// Lifetime of public certificates.
    pub public_validity: chrono::Duration,
    /// Artificial latency of public orders.
    pub order_delay: Duration,
}

impl Default for DevAuthorityConfig {
    fn default() -> Self {
        Self {
            public_validity: chrono::Duration::days(90),
            order_delay: Duration::from_millis(10),
        }
    }
}

/// In-process CA for development and tests.
///
/// Certificates are PEM-armoured JSON descriptions, not X.509.
#[derive(Debug, Default)]
pub struct DevCertificateAuthority {
    config: DevAuthorityConfig,
    revoked: RwLock<HashSet<String>>,
    reject_orders: AtomicBool,
    dns_unreachable: AtomicBool,
}

#[derive(Serialize)]
struct DevCertificate<'a> {
    issuer: &'a str,
    common_name: &'a str,
    alt_names: &'a [String],
    serial_number: &'a str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl DevCertificateAuthority {
    /// Creates a CA with `config`.
    pub fn new(config: DevAuthorityConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Makes subsequent public orders fail.
    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// Makes subsequent DNS validations fail.
    pub fn set_dns_unreachable(&self, unreachable: bool) {
        self.dns_unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Whether `serial_number` was revoked.
    pub async fn is_revoked(&self, serial_number: &str) -> bool {
        self.revoked.read().await.contains(serial_number)
    }

    fn issue(
        &self,
        issuer: &str,
        cert: &CertificateFields,
        validity: chrono::Duration,
        with_key: bool,
    ) -> Result<IssuedCertificate, CollaboratorError> {
        if cert.common_name.is_empty() {
            return Err(CollaboratorError("common name is required".into()));
        }

        let serial_number = random::generate_serial_number();
        let not_before = Utc::now();
        let not_after = not_before + validity;
        let body = serde_json::to_vec(&DevCertificate {
            issuer,
            common_name: &cert.common_name,
            alt_names: &cert.alt_names,
            serial_number: &serial_number,
            not_before,
            not_after,
        })
        .map_err(|e| CollaboratorError(e.to_string()))?;

        Ok(IssuedCertificate {
            certificate: pem("CERTIFICATE", &body),
            private_key: with_key
                .then(|| pem("PRIVATE KEY", random::generate_token(32).as_bytes())),
            intermediate: None,
            issuing_ca: Some(pem("CERTIFICATE", issuer.as_bytes())),
            serial_number,
            not_before,
            not_after,
        })
    }
}

fn pem(label: &str, body: &[u8]) -> String {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        BASE64.encode(body)
    )
}

#[async_trait]
impl CertificateAuthority for DevCertificateAuthority {
    async fn issue_private(
        &self,
        request: &PrivateCertRequest,
    ) -> Result<IssuedCertificate, CollaboratorError> {
        let ttl = i64::try_from(request.ttl_secs)
            .map_err(|_| CollaboratorError("ttl out of range".into()))?;
        if ttl == 0 {
            return Err(CollaboratorError("ttl must be positive".into()));
        }

        let issuer = format!("vigil-dev-ca/{}", request.certificate_template);
        debug!(common_name = %request.cert.common_name, "Issuing private certificate");
        self.issue(
            &issuer,
            &request.cert,
            chrono::Duration::seconds(ttl),
            request.csr.is_none(),
        )
    }

    async fn prepare_challenges(
        &self,
        request: &PublicCertRequest,
    ) -> Result<Vec<DnsChallenge>, CollaboratorError> {
        let expiration = Utc::now() + chrono::Duration::days(7);
        Ok(std::iter::once(&request.cert.common_name)
            .chain(request.cert.alt_names.iter())
            .map(|domain| DnsChallenge {
                domain: domain.clone(),
                txt_record_name: format!("_acme-challenge.{domain}"),
                txt_record_value: random::generate_token(32),
                expiration,
            })
            .collect())
    }

    async fn validate_challenges(
        &self,
        challenges: &[DnsChallenge],
    ) -> Result<bool, CollaboratorError> {
        if self.dns_unreachable.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let now = Utc::now();
        Ok(challenges.iter().all(|c| c.expiration > now))
    }

    async fn order_public(
        &self,
        request: &PublicCertRequest,
    ) -> Result<IssuedCertificate, CollaboratorError> {
        tokio::time::sleep(self.config.order_delay).await;
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(CollaboratorError(format!(
                "CA {} rejected the order",
                request.ca
            )));
        }

        let mut issued = self.issue(
            &format!("vigil-dev-acme/{}", request.ca),
            &request.cert,
            self.config.public_validity,
            true,
        )?;
        if request.bundle_certs {
            issued.intermediate = issued.issuing_ca.clone();
        }
        Ok(issued)
    }

    async fn revoke(&self, serial_number: &str) -> Result<(), CollaboratorError> {
        self.revoked.write().await.insert(serial_number.to_string());
        Ok(())
    }
}
