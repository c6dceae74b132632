//! Material for new versions, produced before any lock is taken.
//!
//! Everything here may call a collaborator over the network, so the engine
//! runs it against a snapshot and only commits the outcome under the
//! secret's writer lock.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;
use x509_parser::prelude::{ASN1Time, FromDer, X509Certificate};

use vigil_crypto::random;

use crate::authority::{IssuedCertificate, PrivateCertRequest, PublicCertRequest};
use crate::credentials::CredentialRequest;
use crate::error::LifecycleError;
use crate::model::{
    CertificateBundle, DnsChallenge, DnsMode, PrivateCertAttributes, PublicCertAttributes, SecretKind,
    SecretPayload, SecretType,
};
use crate::versions::{CertificateInfo, CredentialInfo, Validity, VersionRecord};

use super::requests::SecretMaterial;
use super::LifecycleEngine;

/// Plain material of a version about to be sealed.
pub(super) struct PreparedVersion {
    pub payload: SecretPayload,
    pub certificate: Option<CertificateInfo>,
    pub credential: Option<CredentialInfo>,
}

impl PreparedVersion {
    fn plain(payload: SecretPayload) -> Self {
        Self {
            payload,
            certificate: None,
            credential: None,
        }
    }

    pub(super) fn certificate(secret_type: SecretType, issued: IssuedCertificate) -> Self {
        let bundle = CertificateBundle {
            certificate: issued.certificate,
            private_key: issued.private_key,
            intermediate: issued.intermediate,
            issuing_ca: issued.issuing_ca,
        };
        let payload = match secret_type {
            SecretType::PublicCert => SecretPayload::PublicCert(bundle),
            _ => SecretPayload::PrivateCert(bundle),
        };
        Self {
            payload,
            certificate: Some(CertificateInfo {
                validity: Validity {
                    not_before: issued.not_before,
                    not_after: issued.not_after,
                },
                serial_number: issued.serial_number,
                revocation_time: None,
            }),
            credential: None,
        }
    }
}

/// Reads the validity window and serial number of an imported leaf
/// certificate, the first certificate in `pem`.
pub(super) fn inspect_certificate(pem: &str) -> Result<CertificateInfo, LifecycleError> {
    let invalid = |reason: String| LifecycleError::Validation(format!("invalid certificate: {reason}"));

    let mut cursor = Cursor::new(pem.as_bytes());
    let der = rustls_pemfile::certs(&mut cursor)
        .next()
        .ok_or_else(|| invalid("no PEM certificate found".into()))?
        .map_err(|e| invalid(e.to_string()))?;
    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| invalid(e.to_string()))?;

    let timestamp = |t: &ASN1Time| {
        DateTime::<Utc>::from_timestamp(t.timestamp(), 0)
            .ok_or_else(|| invalid("validity date out of range".into()))
    };
    let validity = cert.validity();
    Ok(CertificateInfo {
        validity: Validity {
            not_before: timestamp(&validity.not_before)?,
            not_after: timestamp(&validity.not_after)?,
        },
        serial_number: cert.raw_serial_as_string(),
        revocation_time: None,
    })
}

/// What a create or rotate request turns into.
pub(super) enum Prepared {
    /// A version ready to append.
    Version(PreparedVersion),
    /// A public certificate order to run in the background.
    Order(PublicCertRequest),
    /// DNS challenges an operator must publish first.
    Challenges(Vec<DnsChallenge>),
}

pub(super) fn public_request(attrs: &PublicCertAttributes, rotate_keys: bool) -> PublicCertRequest {
    PublicCertRequest {
        cert: attrs.cert.clone(),
        ca: attrs.ca.clone(),
        dns: attrs.dns.clone(),
        bundle_certs: attrs.bundle_certs,
        rotate_keys,
    }
}

impl LifecycleEngine {
    /// Turns `material` into something the engine can commit. `previous` is
    /// the opened payload of the current version, when the kind needs it.
    pub(super) async fn prepare(
        &self,
        secret_id: Uuid,
        name: &str,
        kind: &SecretKind,
        material: SecretMaterial,
        previous: Option<SecretPayload>,
        rotate_keys: bool,
    ) -> Result<Prepared, LifecycleError> {
        match (kind, material) {
            (
                SecretKind::UsernamePassword,
                SecretMaterial::Supplied(SecretPayload::UsernamePassword { username, password }),
            ) => {
                let password = if password.is_empty() {
                    self.generate_password()?
                } else {
                    password
                };
                Ok(Prepared::Version(PreparedVersion::plain(
                    SecretPayload::UsernamePassword { username, password },
                )))
            }
            (SecretKind::UsernamePassword, SecretMaterial::Generate) => {
                let Some(SecretPayload::UsernamePassword { username, .. }) = previous else {
                    return Err(LifecycleError::Validation(
                        "the current version has no username to keep".into(),
                    ));
                };
                Ok(Prepared::Version(PreparedVersion::plain(
                    SecretPayload::UsernamePassword {
                        username,
                        password: self.generate_password()?,
                    },
                )))
            }
            (SecretKind::IamCredentials(attrs), SecretMaterial::Generate) => {
                let issued = self
                    .credentials
                    .create_api_key(&CredentialRequest {
                        secret_name: name.to_string(),
                        service_id: attrs.service_id.clone(),
                        access_groups: attrs.access_groups.clone(),
                        ttl_secs: attrs.ttl_secs,
                    })
                    .await
                    .map_err(|e| LifecycleError::IssuanceFailed {
                        id: secret_id,
                        reason: e.0,
                    })?;
                Ok(Prepared::Version(PreparedVersion {
                    credential: Some(CredentialInfo {
                        api_key_id: issued.api_key_id.clone(),
                        service_id: issued.service_id.clone(),
                        credentials_deleted: false,
                    }),
                    payload: SecretPayload::IamCredentials {
                        api_key: issued.api_key,
                        api_key_id: issued.api_key_id,
                        service_id: issued.service_id,
                    },
                    certificate: None,
                }))
            }
            (SecretKind::PrivateCert(attrs), SecretMaterial::Generate) => {
                self.issue_private(secret_id, attrs, None).await
            }
            (SecretKind::PrivateCert(attrs), SecretMaterial::Csr(csr)) => {
                self.issue_private(secret_id, attrs, Some(csr)).await
            }
            (SecretKind::PublicCert(attrs), SecretMaterial::Generate) => {
                let request = public_request(attrs, rotate_keys);
                match attrs.dns_mode {
                    DnsMode::Automatic => Ok(Prepared::Order(request)),
                    DnsMode::Manual => {
                        let challenges = self
                            .authority
                            .prepare_challenges(&request)
                            .await
                            .map_err(|e| LifecycleError::IssuanceFailed {
                                id: secret_id,
                                reason: e.0,
                            })?;
                        Ok(Prepared::Challenges(challenges))
                    }
                }
            }
            (
                SecretKind::ImportedCert(_),
                SecretMaterial::Supplied(SecretPayload::ImportedCert(bundle)),
            ) => {
                let certificate = inspect_certificate(&bundle.certificate)?;
                Ok(Prepared::Version(PreparedVersion {
                    payload: SecretPayload::ImportedCert(bundle),
                    certificate: Some(certificate),
                    credential: None,
                }))
            }
            (_, SecretMaterial::Supplied(payload)) if payload.secret_type() == kind.secret_type() => {
                Ok(Prepared::Version(PreparedVersion::plain(payload)))
            }
            (kind, _) => Err(LifecycleError::Validation(format!(
                "{} secrets do not accept this input",
                kind.secret_type()
            ))),
        }
    }

    async fn issue_private(
        &self,
        secret_id: Uuid,
        attrs: &PrivateCertAttributes,
        csr: Option<String>,
    ) -> Result<Prepared, LifecycleError> {
        let request = PrivateCertRequest {
            cert: attrs.cert.clone(),
            certificate_template: attrs.certificate_template.clone(),
            ttl_secs: attrs.ttl_secs,
            csr,
        };
        let timeout = self.config.issuance_timeout;
        let issued = match tokio::time::timeout(timeout, self.authority.issue_private(&request)).await
        {
            Ok(Ok(issued)) => issued,
            Ok(Err(e)) => {
                return Err(LifecycleError::IssuanceFailed {
                    id: secret_id,
                    reason: e.0,
                })
            }
            Err(_) => {
                return Err(LifecycleError::IssuanceTimeout {
                    id: secret_id,
                    after_secs: timeout.as_secs(),
                })
            }
        };
        Ok(Prepared::Version(PreparedVersion::certificate(
            SecretType::PrivateCert,
            issued,
        )))
    }

    fn generate_password(&self) -> Result<String, LifecycleError> {
        let password = random::generate_password(self.config.password_length)?;
        Ok(password.as_str().to_owned())
    }

    /// Seals prepared material into a new version record.
    pub(super) fn seal_version(
        &self,
        secret_id: Uuid,
        prepared: PreparedVersion,
        created_by: &str,
        auto_rotated: bool,
        custom_metadata: Map<String, Value>,
    ) -> Result<VersionRecord, LifecycleError> {
        let id = Uuid::new_v4();
        let sealed = self.sealer.seal(secret_id, id, &prepared.payload)?;
        Ok(VersionRecord {
            id,
            creation_date: Utc::now(),
            created_by: created_by.to_string(),
            auto_rotated,
            custom_metadata,
            sealed_payload: Some(sealed),
            certificate: prepared.certificate,
            credential: prepared.credential,
        })
    }
}
