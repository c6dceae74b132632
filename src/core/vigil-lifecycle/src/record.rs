//! The persisted unit: one secret with its versions, locks and policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::locks::LockTable;
use crate::model::{SecretKind, SecretState, SecretType};
use crate::policy::PolicyStore;
use crate::versions::VersionStore;

pub(crate) const SECRET_PREFIX: &str = "secrets/";

/// Everything the engine knows about one secret.
///
/// Stored as a single value so that a mutation touching versions and locks
/// together is committed in one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Secret ID.
    pub id: Uuid,
    /// Name, unique per group and type.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: Option<String>,
    /// Owning group.
    pub secret_group_id: String,
    /// Search labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Caller supplied metadata.
    #[serde(default)]
    pub custom_metadata: Map<String, Value>,
    /// Kind and kind-specific attributes.
    pub kind: SecretKind,
    /// Lifecycle state.
    pub state: SecretState,
    /// Creator.
    pub created_by: String,
    /// Creation timestamp.
    pub creation_date: DateTime<Utc>,
    /// Last metadata or version change.
    pub last_update_date: DateTime<Utc>,
    /// Caller chosen expiry.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Set when the secret was deleted.
    #[serde(default)]
    pub deletion_date: Option<DateTime<Utc>>,
    /// Set when the whole secret was revoked.
    #[serde(default)]
    pub revocation_time: Option<DateTime<Utc>>,
    /// Version history.
    pub versions: VersionStore,
    /// Locks per version.
    pub locks: LockTable,
    /// Rotation policy and status.
    pub policy: PolicyStore,
}

impl SecretRecord {
    pub(crate) fn storage_key(id: Uuid) -> String {
        format!("{SECRET_PREFIX}{id}")
    }

    /// The secret type.
    pub fn secret_type(&self) -> SecretType {
        self.kind.secret_type()
    }

    /// Whether the secret was deleted.
    pub fn is_deleted(&self) -> bool {
        self.deletion_date.is_some()
    }

    /// Whether a public certificate order is outstanding.
    pub fn issuance_in_flight(&self) -> bool {
        self.kind
            .issuance_info()
            .is_some_and(|info| info.state.is_in_flight())
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: SecretState) -> Result<(), LifecycleError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidState(format!(
                "secret {} cannot move from {} to {}",
                self.id,
                self.state.description(),
                next.description()
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Recomputes the rotation schedule from the current version.
    pub fn reschedule(&mut self) {
        let secret_type = self.secret_type();
        self.policy.reschedule(secret_type, self.versions.current());
    }

    /// Imported certificates expire with the certificate of their current
    /// version.
    pub(crate) fn track_certificate_expiry(&mut self) {
        if self.secret_type() == SecretType::ImportedCert {
            self.expiration_date = self
                .versions
                .current()
                .and_then(|v| v.certificate.as_ref())
                .map(|c| c.validity.not_after);
        }
    }

    /// Fails with [`LifecycleError::UnsupportedOperation`] unless the secret
    /// is one of `allowed`.
    pub fn require_type(
        &self,
        operation: &'static str,
        allowed: &[SecretType],
    ) -> Result<(), LifecycleError> {
        if allowed.contains(&self.secret_type()) {
            Ok(())
        } else {
            Err(LifecycleError::UnsupportedOperation {
                operation,
                secret_type: self.secret_type().to_string(),
            })
        }
    }
}
