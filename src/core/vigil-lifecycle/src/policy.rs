//! Rotation policies and per-secret rotation status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::model::SecretType;
use crate::scheduler::next_rotation_date;
use crate::versions::VersionRecord;

/// Unit of a rotation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationUnit {
    /// Calendar days.
    Day,
    /// Calendar months.
    Month,
}

impl RotationUnit {
    /// Largest interval accepted for the unit (three years).
    pub fn max_interval(&self) -> u32 {
        match self {
            RotationUnit::Day => 1095,
            RotationUnit::Month => 36,
        }
    }
}

/// Rotation settings of one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Whether the scheduler rotates the secret.
    #[serde(default)]
    pub auto_rotate: bool,
    /// Interval length; unused for public certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    /// Interval unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<RotationUnit>,
    /// Request a new private key on rotation (public certificates only).
    #[serde(default)]
    pub rotate_keys: bool,
}

impl RotationPolicy {
    /// Policy rotating every `interval` `unit`s.
    pub fn every(interval: u32, unit: RotationUnit) -> Self {
        Self {
            auto_rotate: true,
            interval: Some(interval),
            unit: Some(unit),
            rotate_keys: false,
        }
    }

    /// Checks the policy against the secret type it is attached to.
    pub fn validate(&self, secret_type: SecretType) -> Result<(), LifecycleError> {
        if self.auto_rotate && !secret_type.supports_auto_rotation() {
            return Err(LifecycleError::UnsupportedOperation {
                operation: "automatic rotation",
                secret_type: secret_type.to_string(),
            });
        }

        if self.rotate_keys && secret_type != SecretType::PublicCert {
            return Err(LifecycleError::Validation(
                "rotate_keys only applies to public certificates".into(),
            ));
        }

        if secret_type == SecretType::PublicCert {
            if self.interval.is_some() || self.unit.is_some() {
                return Err(LifecycleError::Validation(
                    "public certificates rotate 31 days before expiry; interval and unit are not accepted"
                        .into(),
                ));
            }
            return Ok(());
        }

        match (self.interval, self.unit) {
            (Some(interval), Some(unit)) => {
                if interval == 0 || interval > unit.max_interval() {
                    return Err(LifecycleError::Validation(format!(
                        "interval must be between 1 and {} for unit {unit:?}",
                        unit.max_interval()
                    )));
                }
                Ok(())
            }
            (None, None) if !self.auto_rotate => Ok(()),
            _ => Err(LifecycleError::Validation(
                "auto rotation requires both interval and unit".into(),
            )),
        }
    }
}

/// Where a secret stands with respect to automatic rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RotationStatus {
    /// No automatic rotation planned.
    #[default]
    Unscheduled,
    /// Rotation planned.
    Scheduled {
        /// When the scheduler will rotate.
        next_rotation_date: DateTime<Utc>,
    },
    /// The last scheduled rotation failed; not retried.
    Failed {
        /// When the failure happened.
        failed_at: DateTime<Utc>,
        /// Error reported by the engine.
        reason: String,
        /// The date that was due when it failed.
        next_rotation_date: DateTime<Utc>,
    },
}

impl RotationStatus {
    /// The planned or missed rotation date.
    pub fn next_rotation_date(&self) -> Option<DateTime<Utc>> {
        match self {
            RotationStatus::Unscheduled => None,
            RotationStatus::Scheduled { next_rotation_date }
            | RotationStatus::Failed {
                next_rotation_date, ..
            } => Some(*next_rotation_date),
        }
    }
}

/// Policy and rotation status held for one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStore {
    policy: RotationPolicy,
    status: RotationStatus,
}

impl PolicyStore {
    /// The configured policy.
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// The rotation status.
    pub fn status(&self) -> &RotationStatus {
        &self.status
    }

    /// Replaces the policy and recomputes the schedule from `current`.
    ///
    /// A policy update clears a `Failed` status.
    pub fn put(
        &mut self,
        policy: RotationPolicy,
        secret_type: SecretType,
        current: Option<&VersionRecord>,
    ) -> Result<(), LifecycleError> {
        policy.validate(secret_type)?;
        self.policy = policy;
        self.reschedule(secret_type, current);
        Ok(())
    }

    /// Recomputes the schedule after a successful rotation.
    pub fn reschedule(&mut self, secret_type: SecretType, current: Option<&VersionRecord>) {
        let next = current.and_then(|v| next_rotation_date(&self.policy, secret_type, v));
        self.status = match next {
            Some(next_rotation_date) => RotationStatus::Scheduled { next_rotation_date },
            None => RotationStatus::Unscheduled,
        };
    }

    /// Marks the due rotation as failed, keeping its date.
    pub fn record_failure(&mut self, failed_at: DateTime<Utc>, reason: String) {
        if let Some(next_rotation_date) = self.status.next_rotation_date() {
            self.status = RotationStatus::Failed {
                failed_at,
                reason,
                next_rotation_date,
            };
        }
    }

    /// Stops scheduling, e.g. once the secret is deleted.
    pub fn unschedule(&mut self) {
        self.status = RotationStatus::Unscheduled;
    }

    /// Whether a scheduled rotation is due at `now`. Failed rotations never are.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, RotationStatus::Scheduled { next_rotation_date } if next_rotation_date <= now)
    }
}
