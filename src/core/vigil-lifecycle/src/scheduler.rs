//! Automatic rotation.
//!
//! The scheduler owns no state of its own: rotation dates live in each
//! secret's [`PolicyStore`](crate::policy::PolicyStore) and every pass goes
//! through the engine, so scheduled rotations take the same per-secret writer
//! lock as client requests.

use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{LifecycleEngine, ScheduledOutcome};
use crate::model::SecretType;
use crate::policy::{RotationPolicy, RotationUnit};
use crate::versions::VersionRecord;

/// Public certificates are renewed this many days before they expire.
pub const PUBLIC_CERT_RENEWAL_DAYS: i64 = 31;

/// Next automatic rotation date for `current` under `policy`.
///
/// Public certificates ignore the interval and renew ahead of
/// `validity.not_after`; every other type counts the interval from the
/// version's creation date.
pub fn next_rotation_date(
    policy: &RotationPolicy,
    secret_type: SecretType,
    current: &VersionRecord,
) -> Option<DateTime<Utc>> {
    if !policy.auto_rotate {
        return None;
    }

    if secret_type == SecretType::PublicCert {
        let not_after = current.certificate.as_ref()?.validity.not_after;
        return not_after.checked_sub_signed(chrono::Duration::days(PUBLIC_CERT_RENEWAL_DAYS));
    }

    let interval = policy.interval?;
    match policy.unit? {
        RotationUnit::Day => current
            .creation_date
            .checked_add_signed(chrono::Duration::days(i64::from(interval))),
        RotationUnit::Month => current.creation_date.checked_add_months(Months::new(interval)),
    }
}

/// A rotation found due by [`LifecycleEngine::due_rotations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueRotation {
    /// Secret to rotate.
    pub secret_id: Uuid,
    /// Version that was `current` when the rotation was found due.
    pub expected_current: Uuid,
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Secrets that got a new version (or a new certificate order).
    pub rotated: Vec<Uuid>,
    /// Secrets rotated by someone else while the pass was running.
    pub skipped: Vec<Uuid>,
    /// Secrets whose rotation failed, with the reason.
    pub failed: Vec<(Uuid, String)>,
    /// Secrets deactivated because their expiration date passed.
    pub deactivated: Vec<Uuid>,
}

impl TickReport {
    /// Whether the pass did nothing.
    pub fn is_empty(&self) -> bool {
        self.rotated.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
            && self.deactivated.is_empty()
    }
}

/// Drives automatic rotation and expiration.
#[derive(Clone)]
pub struct RotationScheduler {
    engine: LifecycleEngine,
}

impl RotationScheduler {
    /// Creates a scheduler for `engine`.
    pub fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    /// Runs one pass at `now`.
    ///
    /// Failures are recorded on the secret and never retried by later passes.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for due in self.engine.due_rotations(now).await {
            match self.engine.rotate_scheduled(due).await {
                Ok(ScheduledOutcome::Rotated) => report.rotated.push(due.secret_id),
                Ok(ScheduledOutcome::Skipped) => {
                    debug!(secret_id = %due.secret_id, "Scheduled rotation superseded");
                    report.skipped.push(due.secret_id);
                }
                Err(e) => {
                    warn!(secret_id = %due.secret_id, error = %e, "Scheduled rotation failed");
                    let reason = e.to_string();
                    if let Err(e) = self
                        .engine
                        .record_rotation_failure(due.secret_id, now, reason.clone())
                        .await
                    {
                        warn!(secret_id = %due.secret_id, error = %e, "Could not record rotation failure");
                    }
                    report.failed.push((due.secret_id, reason));
                }
            }
        }

        match self.engine.deactivate_expired(now).await {
            Ok(ids) => report.deactivated = ids,
            Err(e) => warn!(error = %e, "Expiration pass failed"),
        }

        report
    }

    /// Calls [`RotationScheduler::tick`] every `period` until `shutdown`
    /// turns `true` or its sender is dropped.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_secs = period.as_secs(), "Rotation scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.is_empty() {
                        info!(
                            rotated = report.rotated.len(),
                            skipped = report.skipped.len(),
                            failed = report.failed.len(),
                            deactivated = report.deactivated.len(),
                            "Rotation pass complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Rotation scheduler stopped");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::versions::{CertificateInfo, Validity};
    use chrono::TimeZone;
    use serde_json::Map;

    fn created_at(date: DateTime<Utc>) -> VersionRecord {
        VersionRecord {
            id: Uuid::new_v4(),
            creation_date: date,
            created_by: "tester".into(),
            auto_rotated: false,
            custom_metadata: Map::new(),
            sealed_payload: None,
            certificate: None,
            credential: None,
        }
    }

    #[test]
    fn test_day_interval_counts_from_creation() {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let next = next_rotation_date(
            &RotationPolicy::every(30, RotationUnit::Day),
            SecretType::UsernamePassword,
            &created_at(created),
        );
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_month_interval_clamps_to_month_end() {
        let created = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let next = next_rotation_date(
            &RotationPolicy::every(1, RotationUnit::Month),
            SecretType::PrivateCert,
            &created_at(created),
        );
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_public_cert_renews_before_expiry() {
        let not_after = Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap();
        let mut version = created_at(not_after - chrono::Duration::days(90));
        let policy = RotationPolicy {
            auto_rotate: true,
            ..Default::default()
        };

        assert_eq!(next_rotation_date(&policy, SecretType::PublicCert, &version), None);

        version.certificate = Some(CertificateInfo {
            validity: Validity {
                not_before: not_after - chrono::Duration::days(90),
                not_after,
            },
            serial_number: "01".into(),
            revocation_time: None,
        });
        assert_eq!(
            next_rotation_date(&policy, SecretType::PublicCert, &version),
            Some(Utc.with_ymd_and_hms(2026, 10, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_disabled_policy_has_no_date() {
        let policy = RotationPolicy::default();
        let version = created_at(Utc::now());
        assert_eq!(next_rotation_date(&policy, SecretType::IamCredentials, &version), None);
    }
}
