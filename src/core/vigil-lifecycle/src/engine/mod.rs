//! The secret lifecycle engine.
//!
//! Every secret lives in its own cell: a writer mutex that serialises
//! mutations and an `Arc` snapshot that readers clone without waiting for
//! writers. A mutation clones the snapshot, applies the change, persists the
//! whole record and only then swaps the snapshot, so a failed step leaves
//! both storage and memory untouched.
//!
//! Lock order: group registry, then the secret index, then a cell's writer,
//! then its snapshot.

mod prepare;
mod requests;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use vigil_crypto::{kdf, MasterKey};
use vigil_storage::StorageBackend;

use crate::authority::{
    CertificateAuthority, DevCertificateAuthority, IssuedCertificate, PublicCertRequest,
};
use crate::configuration::{
    Configuration, ConfigurationRegistry, ConfigurationUpdate, IamConfiguration,
    StoredConfiguration,
};
use crate::credentials::{CredentialProvider, InMemoryCredentialProvider};
use crate::error::LifecycleError;
use crate::groups::{GroupRegistry, GroupUpdate, SecretGroup, DEFAULT_GROUP_ID};
use crate::issuance::IssuanceTracker;
use crate::locks::{validate_specs, Lock, LockMode, LockSpec};
use crate::model::{
    DnsChallenge, DnsMode, IssuanceInfo, IssuanceState, Page, Pagination, SecretKind, SecretPayload,
    SecretState, SecretType, DEFAULT_PAGE_LIMIT,
};
use crate::policy::RotationPolicy;
use crate::record::{SecretRecord, SECRET_PREFIX};
use crate::scheduler::DueRotation;
use crate::sealing::Sealer;
use crate::versions::{VersionRecord, VersionRef};
use crate::views::{
    PolicyView, SecretMetadata, SecretView, VersionLocks, VersionMetadata, VersionView, Versions,
};

use prepare::{public_request, Prepared, PreparedVersion};
pub use requests::{
    CreateSecretRequest, CredentialRef, MetadataUpdate, RotateRequest, SecretFilter,
    SecretMaterial,
};

const SCHEDULER_ACTOR: &str = "scheduler";
const IAM_API_KEY_SETTING: &str = "iam_credentials.api_key";

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a certificate issuance.
    pub issuance_timeout: Duration,
    /// Length of generated passwords.
    pub password_length: usize,
    /// Page size when a listing gives no limit.
    pub default_page_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuance_timeout: Duration::from_secs(120),
            password_length: 32,
            default_page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// External systems the engine calls to mint credentials and certificates.
#[derive(Clone)]
pub struct Collaborators {
    /// IAM API key provider.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Private and public certificate authority.
    pub authority: Arc<dyn CertificateAuthority>,
}

impl Default for Collaborators {
    /// In-process implementations for development.
    fn default() -> Self {
        Self {
            credentials: Arc::new(InMemoryCredentialProvider::new()),
            authority: Arc::new(DevCertificateAuthority::default()),
        }
    }
}

/// Result of a scheduled rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledOutcome {
    /// A new version was created or a certificate ordered.
    Rotated,
    /// The secret changed since it was found due.
    Skipped,
}

struct SecretCell {
    writer: Mutex<()>,
    snapshot: RwLock<Arc<SecretRecord>>,
}

impl SecretCell {
    fn new(record: SecretRecord) -> Self {
        Self {
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(record)),
        }
    }

    async fn load(&self) -> Arc<SecretRecord> {
        self.snapshot.read().await.clone()
    }
}

type SecretIndex = HashMap<Uuid, Arc<SecretCell>>;

fn not_found(id: Uuid) -> LifecycleError {
    LifecycleError::NotFound(format!("secret {id}"))
}

fn issuance_mut(kind: &mut SecretKind) -> Option<&mut Option<IssuanceInfo>> {
    match kind {
        SecretKind::PublicCert(attrs) => Some(&mut attrs.issuance_info),
        _ => None,
    }
}

fn start_issuance(
    record: &mut SecretRecord,
    state: IssuanceState,
    challenges: Vec<DnsChallenge>,
    auto_rotated: bool,
) {
    if let Some(slot) = issuance_mut(&mut record.kind) {
        *slot = Some(IssuanceInfo {
            state,
            ordered_on: Utc::now(),
            challenges,
            dns_challenge_validation_time: None,
            auto_rotated,
            error_message: None,
        });
    }
}

async fn name_taken(
    index: &SecretIndex,
    group: &str,
    secret_type: SecretType,
    name: &str,
    except: Option<Uuid>,
) -> bool {
    for (id, cell) in index {
        if Some(*id) == except {
            continue;
        }
        let record = cell.load().await;
        if !record.is_deleted()
            && record.secret_group_id == group
            && record.secret_type() == secret_type
            && record.name == name
        {
            return true;
        }
    }
    false
}

/// Manages secrets, their versions, locks and rotation.
///
/// Cheap to clone; clones share all state. Writes are attributed to the
/// actor set with [`LifecycleEngine::acting_as`], or to the storage
/// backend's own actor when none is set.
#[derive(Clone)]
pub struct LifecycleEngine {
    storage: Arc<dyn StorageBackend>,
    sealer: Arc<Sealer>,
    credentials: Arc<dyn CredentialProvider>,
    authority: Arc<dyn CertificateAuthority>,
    groups: Arc<GroupRegistry>,
    configuration: Arc<ConfigurationRegistry>,
    secrets: Arc<RwLock<SecretIndex>>,
    issuance: Arc<IssuanceTracker>,
    config: EngineConfig,
    actor: Option<Arc<str>>,
}

impl LifecycleEngine {
    /// Opens the engine over `storage`, loading every persisted secret.
    ///
    /// Certificate orders that were outstanding when the previous process
    /// stopped are placed again.
    pub async fn open(
        storage: Arc<dyn StorageBackend>,
        master: MasterKey,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Result<Self, LifecycleError> {
        let groups = GroupRegistry::load(storage.clone()).await?;
        let configuration = ConfigurationRegistry::load(storage.clone()).await?;
        let sealer = Sealer::new(master);

        let iam_key = configuration
            .stored(SecretType::IamCredentials)
            .await
            .and_then(|stored| stored.sealed_api_key);
        if let Some(sealed) = iam_key {
            let api_key = sealer.open_setting(IAM_API_KEY_SETTING, &sealed)?;
            if let Err(e) = collaborators.credentials.configure(&api_key).await {
                warn!(error = %e, "Credential provider rejected the stored API key");
            }
        }

        let mut secrets = HashMap::new();
        for key in storage.list(SECRET_PREFIX).await? {
            if let Some(raw) = storage.get(&key).await? {
                let record: SecretRecord = serde_json::from_slice(&raw)?;
                secrets.insert(record.id, Arc::new(SecretCell::new(record)));
            }
        }
        info!(secrets = secrets.len(), "Lifecycle engine ready");

        let engine = Self {
            storage,
            sealer: Arc::new(sealer),
            credentials: collaborators.credentials,
            authority: collaborators.authority,
            groups: Arc::new(groups),
            configuration: Arc::new(configuration),
            secrets: Arc::new(RwLock::new(secrets)),
            issuance: Arc::new(IssuanceTracker::new(config.issuance_timeout)),
            config,
            actor: None,
        };
        engine.resume_orders().await;
        Ok(engine)
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle whose writes are journaled under `actor`.
    pub fn acting_as(&self, actor: &str) -> Self {
        let mut engine = self.clone();
        engine.actor = Some(Arc::from(actor));
        engine
    }

    /// Actor set with [`LifecycleEngine::acting_as`].
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    // ========================================================================
    // Cells and persistence
    // ========================================================================

    async fn cell(&self, id: Uuid) -> Result<Arc<SecretCell>, LifecycleError> {
        self.secrets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn snapshot(&self, id: Uuid) -> Result<Arc<SecretRecord>, LifecycleError> {
        let record = self.cell(id).await?.load().await;
        if record.is_deleted() {
            return Err(not_found(id));
        }
        Ok(record)
    }

    async fn live_snapshots(&self) -> Vec<Arc<SecretRecord>> {
        let index = self.secrets.read().await;
        let mut records = Vec::with_capacity(index.len());
        for cell in index.values() {
            let record = cell.load().await;
            if !record.is_deleted() {
                records.push(record);
            }
        }
        records
    }

    async fn persist(&self, record: &SecretRecord) -> Result<(), LifecycleError> {
        let key = SecretRecord::storage_key(record.id);
        let raw = serde_json::to_vec(record)?;
        match self.actor() {
            Some(actor) => self.storage.put_as(&key, &raw, actor).await?,
            None => self.storage.put(&key, &raw).await?,
        }
        Ok(())
    }

    async fn check_configured(&self, kind: &SecretKind) -> Result<(), LifecycleError> {
        match kind {
            SecretKind::PublicCert(attrs) => {
                self.configuration
                    .check_public_cert(&attrs.ca, &attrs.dns)
                    .await
            }
            SecretKind::PrivateCert(attrs) => {
                self.configuration
                    .check_private_cert(&attrs.certificate_template)
                    .await
            }
            SecretKind::IamCredentials(_) => self.configuration.check_iam().await,
            _ => Ok(()),
        }
    }

    async fn mutate<T, F>(&self, id: Uuid, apply: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&mut SecretRecord) -> Result<T, LifecycleError> + Send,
        T: Send,
    {
        let cell = self.cell(id).await?;
        self.mutate_cell(&cell, apply).await
    }

    async fn mutate_cell<T, F>(&self, cell: &SecretCell, apply: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&mut SecretRecord) -> Result<T, LifecycleError> + Send,
        T: Send,
    {
        let _writer = cell.writer.lock().await;
        let current = cell.load().await;
        if current.is_deleted() {
            return Err(not_found(current.id));
        }

        let mut next = SecretRecord::clone(&current);
        let value = apply(&mut next)?;
        self.persist(&next).await?;
        *cell.snapshot.write().await = Arc::new(next);
        Ok(value)
    }

    fn secret_view(&self, record: &SecretRecord) -> Result<SecretView, LifecycleError> {
        let version = record
            .versions
            .current()
            .map(|v| self.version_view(record, v))
            .transpose()?;
        Ok(SecretView {
            metadata: SecretMetadata::new(record),
            version,
        })
    }

    fn version_view(
        &self,
        record: &SecretRecord,
        version: &VersionRecord,
    ) -> Result<VersionView, LifecycleError> {
        let payload = version
            .sealed_payload
            .as_deref()
            .map(|sealed| self.sealer.open(record.id, version.id, sealed))
            .transpose()?;
        Ok(VersionView {
            metadata: VersionMetadata::new(record, version),
            payload,
        })
    }

    fn open_current(&self, record: &SecretRecord) -> Result<Option<SecretPayload>, LifecycleError> {
        match record.versions.current() {
            Some(v) => v
                .sealed_payload
                .as_deref()
                .map(|sealed| self.sealer.open(record.id, v.id, sealed))
                .transpose(),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Secrets
    // ========================================================================

    /// Creates a secret with its first version.
    ///
    /// Public certificates start in pre-activation without a version; the
    /// certificate is ordered in the background (see
    /// [`LifecycleEngine::await_issuance`]).
    pub async fn create_secret(
        &self,
        request: CreateSecretRequest,
    ) -> Result<SecretView, LifecycleError> {
        let now = Utc::now();
        request.validate(now)?;

        let secret_type = request.kind.secret_type();
        let group_id = request
            .secret_group_id
            .clone()
            .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string());
        self.groups.get(&group_id).await?;
        self.check_configured(&request.kind).await?;
        {
            let index = self.secrets.read().await;
            if name_taken(&index, &group_id, secret_type, &request.name, None).await {
                return Err(LifecycleError::AlreadyExists(format!(
                    "{secret_type} secret {} in group {group_id}",
                    request.name
                )));
            }
        }

        let id = Uuid::new_v4();
        let prepared = self
            .prepare(id, &request.name, &request.kind, request.material, None, false)
            .await?;

        let mut record = SecretRecord {
            id,
            name: request.name,
            description: request.description,
            secret_group_id: group_id.clone(),
            labels: request.labels,
            custom_metadata: request.custom_metadata,
            kind: request.kind,
            state: SecretState::Active,
            created_by: request.created_by.clone(),
            creation_date: now,
            last_update_date: now,
            expiration_date: request.expiration_date,
            deletion_date: None,
            revocation_time: None,
            versions: Default::default(),
            locks: Default::default(),
            policy: Default::default(),
        };

        let mut order = None;
        match prepared {
            Prepared::Version(prepared) => {
                let version = self.seal_version(
                    id,
                    prepared,
                    &request.created_by,
                    false,
                    request.version_custom_metadata,
                )?;
                record.versions.append(version);
                record.track_certificate_expiry();
            }
            Prepared::Order(order_request) => {
                record.state = SecretState::PreActivation;
                start_issuance(&mut record, IssuanceState::Ordered, Vec::new(), false);
                order = Some((order_request, request.version_custom_metadata));
            }
            Prepared::Challenges(challenges) => {
                record.state = SecretState::PreActivation;
                start_issuance(&mut record, IssuanceState::ChallengesPending, challenges, false);
            }
        }
        record
            .policy
            .put(request.rotation, secret_type, record.versions.current())?;

        {
            let groups = self.groups.shared().await;
            if !groups.contains_key(&group_id) {
                return Err(LifecycleError::NotFound(format!("secret group {group_id}")));
            }
            let mut index = self.secrets.write().await;
            if name_taken(&index, &group_id, secret_type, &record.name, None).await {
                return Err(LifecycleError::AlreadyExists(format!(
                    "{secret_type} secret {} in group {group_id}",
                    record.name
                )));
            }
            self.persist(&record).await?;
            index.insert(id, Arc::new(SecretCell::new(record.clone())));
        }

        info!(
            secret_id = %id,
            secret_type = %secret_type,
            group = %group_id,
            state = record.state.description(),
            "Secret created"
        );

        if let Some((order_request, custom)) = order {
            self.spawn_order(id, order_request, false, request.created_by, custom)
                .await;
        }
        self.secret_view(&record)
    }

    /// Secret metadata plus the current version with its payload.
    pub async fn get_secret(&self, id: Uuid) -> Result<SecretView, LifecycleError> {
        let record = self.snapshot(id).await?;
        self.secret_view(&record)
    }

    /// Secret metadata without payload.
    pub async fn get_secret_metadata(&self, id: Uuid) -> Result<SecretMetadata, LifecycleError> {
        Ok(SecretMetadata::new(&*self.snapshot(id).await?))
    }

    /// Applies a metadata change. Renames keep names unique per group and
    /// type.
    pub async fn update_secret_metadata(
        &self,
        id: Uuid,
        update: MetadataUpdate,
    ) -> Result<SecretMetadata, LifecycleError> {
        let record = self.snapshot(id).await?;
        update.validate(record.secret_type(), Utc::now())?;
        let rename = update.name.clone().filter(|name| *name != record.name);

        let apply = |record: &mut SecretRecord| {
            if let Some(name) = update.name {
                record.name = name;
            }
            if let Some(description) = update.description {
                record.description = Some(description);
            }
            if let Some(labels) = update.labels {
                record.labels = labels;
            }
            if let Some(custom) = update.custom_metadata {
                record.custom_metadata = custom;
            }
            if let Some(expiration) = update.expiration_date {
                record.expiration_date = Some(expiration);
            }
            record.last_update_date = Utc::now();
            Ok(SecretMetadata::new(record))
        };

        let metadata = match rename {
            Some(name) => {
                let index = self.secrets.write().await;
                let cell = index.get(&id).cloned().ok_or_else(|| not_found(id))?;
                if name_taken(&index, &record.secret_group_id, record.secret_type(), &name, Some(id))
                    .await
                {
                    return Err(LifecycleError::AlreadyExists(format!(
                        "{} secret {name} in group {}",
                        record.secret_type(),
                        record.secret_group_id
                    )));
                }
                self.mutate_cell(&cell, apply).await?
            }
            _ => self.mutate(id, apply).await?,
        };

        debug!(secret_id = %id, "Secret metadata updated");
        Ok(metadata)
    }

    /// Lists live secrets in creation order.
    pub async fn list_secrets(
        &self,
        filter: &SecretFilter,
        page: Pagination,
    ) -> Result<Page<SecretMetadata>, LifecycleError> {
        let mut records: Vec<_> = self
            .live_snapshots()
            .await
            .into_iter()
            .filter(|r| filter.matches(r.secret_type(), &r.secret_group_id, &r.name, &r.labels))
            .collect();
        records.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = records.len();
        Ok(Page {
            items: page
                .apply(records)
                .iter()
                .map(|r| SecretMetadata::new(r))
                .collect(),
            total,
        })
    }

    /// Deletes a secret. Refused while any version holds a lock.
    pub async fn delete_secret(&self, id: Uuid) -> Result<(), LifecycleError> {
        self.mutate(id, |record| {
            if record.locks.any_locked() {
                return Err(LifecycleError::SecretLocked {
                    id,
                    locks: record.locks.total(),
                });
            }
            let now = Utc::now();
            record.state = SecretState::Destroyed;
            record.deletion_date = Some(now);
            record.last_update_date = now;
            record.policy.unschedule();
            Ok(())
        })
        .await?;

        self.issuance.cancel(id).await;
        warn!(secret_id = %id, "Secret deleted");
        Ok(())
    }

    /// Moves a secret to `state`, following the key state machine.
    /// Destroying is refused while any version holds a lock.
    pub async fn set_state(
        &self,
        id: Uuid,
        state: SecretState,
    ) -> Result<SecretMetadata, LifecycleError> {
        let metadata = self
            .mutate(id, |record| {
                if state == SecretState::Destroyed && record.locks.any_locked() {
                    return Err(LifecycleError::SecretLocked {
                        id,
                        locks: record.locks.total(),
                    });
                }
                record.transition(state)?;
                if matches!(state, SecretState::Deactivated | SecretState::Destroyed) {
                    record.policy.unschedule();
                }
                record.last_update_date = Utc::now();
                Ok(SecretMetadata::new(record))
            })
            .await?;
        if state == SecretState::Destroyed {
            self.issuance.cancel(id).await;
        }
        info!(secret_id = %id, state = state.description(), "Secret state changed");
        Ok(metadata)
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// A version with its payload.
    pub async fn get_version(
        &self,
        id: Uuid,
        version: VersionRef,
    ) -> Result<VersionView, LifecycleError> {
        let record = self.snapshot(id).await?;
        let v = record.versions.resolve(id, version)?;
        self.version_view(&record, v)
    }

    /// Version metadata without payload.
    pub async fn get_version_metadata(
        &self,
        id: Uuid,
        version: VersionRef,
    ) -> Result<VersionMetadata, LifecycleError> {
        let record = self.snapshot(id).await?;
        let v = record.versions.resolve(id, version)?;
        Ok(VersionMetadata::new(&record, v))
    }

    /// Replaces the custom metadata of a version.
    pub async fn update_version_metadata(
        &self,
        id: Uuid,
        version: VersionRef,
        custom_metadata: Map<String, Value>,
    ) -> Result<VersionMetadata, LifecycleError> {
        self.mutate(id, |record| {
            let target = record.versions.resolve_mut(id, version)?;
            target.custom_metadata = custom_metadata;
            let target = target.id;
            record.last_update_date = Utc::now();
            let v = record.versions.resolve(id, VersionRef::Id(target))?;
            Ok(VersionMetadata::new(record, v))
        })
        .await
    }

    /// Versions of a secret, newest first.
    pub async fn list_versions(&self, id: Uuid) -> Result<Versions, LifecycleError> {
        Ok(Versions::new(self.snapshot(id).await?))
    }

    // ========================================================================
    // Rotation, restore, revocation
    // ========================================================================

    /// Creates a new version. Public certificates are ordered in the
    /// background and the returned view still shows the old version.
    pub async fn rotate(
        &self,
        id: Uuid,
        request: RotateRequest,
    ) -> Result<SecretView, LifecycleError> {
        let record = self.snapshot(id).await?;
        self.rotate_record(record, request, false, None)
            .await?
            .ok_or_else(|| LifecycleError::InvalidState(format!("secret {id} changed during rotation")))
    }

    /// Shared by client and scheduled rotations. Returns `None` when
    /// `expected_current` no longer matches.
    async fn rotate_record(
        &self,
        record: Arc<SecretRecord>,
        request: RotateRequest,
        auto_rotated: bool,
        expected_current: Option<Uuid>,
    ) -> Result<Option<SecretView>, LifecycleError> {
        let id = record.id;
        let secret_type = record.secret_type();
        requests::check_material(secret_type, &request.material, false)?;
        if matches!(record.state, SecretState::Deactivated | SecretState::Destroyed) {
            return Err(LifecycleError::InvalidState(format!(
                "secret {id} is {} and cannot be rotated",
                record.state.description()
            )));
        }
        if record.issuance_in_flight() {
            return Err(LifecycleError::InvalidState(format!(
                "secret {id} has a certificate order in progress"
            )));
        }
        self.check_configured(&record.kind).await?;

        let previous = match (secret_type, &request.material) {
            (SecretType::UsernamePassword, SecretMaterial::Generate) => self.open_current(&record)?,
            _ => None,
        };
        let rotate_keys = request
            .rotate_keys
            .unwrap_or(record.policy.policy().rotate_keys);
        let prepared = self
            .prepare(id, &record.name, &record.kind, request.material, previous, rotate_keys)
            .await?;

        let still_current = move |r: &SecretRecord| match expected_current {
            Some(expected) => r.versions.current().map(|v| v.id) == Some(expected),
            None => true,
        };

        match prepared {
            Prepared::Version(prepared) => {
                let credential = prepared.credential.clone();
                let version = self.seal_version(
                    id,
                    prepared,
                    &request.actor,
                    auto_rotated,
                    request.version_custom_metadata,
                )?;
                let version_id = version.id;
                let view = self
                    .mutate(id, |r| {
                        if !still_current(r) {
                            return Ok(None);
                        }
                        r.versions.append(version);
                        r.track_certificate_expiry();
                        r.last_update_date = Utc::now();
                        r.reschedule();
                        self.secret_view(r).map(Some)
                    })
                    .await;

                match view {
                    Ok(Some(view)) => {
                        info!(
                            secret_id = %id,
                            version_id = %version_id,
                            auto_rotated,
                            "Secret rotated"
                        );
                        Ok(Some(view))
                    }
                    outcome => {
                        if let Some(credential) = credential {
                            self.discard_api_key(id, &credential.api_key_id).await;
                        }
                        outcome
                    }
                }
            }
            Prepared::Order(order_request) => {
                let view = self
                    .mutate(id, |r| {
                        if !still_current(r) {
                            return Ok(None);
                        }
                        start_issuance(r, IssuanceState::Ordered, Vec::new(), auto_rotated);
                        r.last_update_date = Utc::now();
                        self.secret_view(r).map(Some)
                    })
                    .await?;
                if view.is_some() {
                    info!(secret_id = %id, auto_rotated, "Certificate renewal ordered");
                    self.spawn_order(
                        id,
                        order_request,
                        auto_rotated,
                        request.actor,
                        request.version_custom_metadata,
                    )
                    .await;
                }
                Ok(view)
            }
            Prepared::Challenges(challenges) => {
                let view = self
                    .mutate(id, |r| {
                        if !still_current(r) {
                            return Ok(None);
                        }
                        start_issuance(r, IssuanceState::ChallengesPending, challenges, auto_rotated);
                        r.last_update_date = Utc::now();
                        self.secret_view(r).map(Some)
                    })
                    .await?;
                if view.is_some() {
                    info!(secret_id = %id, "DNS challenges issued for certificate renewal");
                }
                Ok(view)
            }
        }
    }

    async fn discard_api_key(&self, id: Uuid, api_key_id: &str) {
        match self.credentials.delete_api_key(api_key_id).await {
            Ok(_) => debug!(secret_id = %id, api_key_id, "Discarded unused API key"),
            Err(e) => warn!(secret_id = %id, api_key_id, error = %e, "Could not discard unused API key"),
        }
    }

    /// Makes an older IAM credentials version current again by appending a
    /// copy of it.
    pub async fn restore(
        &self,
        id: Uuid,
        version: VersionRef,
        custom_metadata: Map<String, Value>,
        actor: &str,
    ) -> Result<SecretView, LifecycleError> {
        let view = self
            .mutate(id, |record| {
                record.require_type("restore", &[SecretType::IamCredentials])?;
                if matches!(record.state, SecretState::Deactivated | SecretState::Destroyed) {
                    return Err(LifecycleError::InvalidState(format!(
                        "secret {id} is {}",
                        record.state.description()
                    )));
                }

                let source = record.versions.resolve(id, version)?;
                if record.versions.current().map(|v| v.id) == Some(source.id) {
                    return Err(LifecycleError::Validation(
                        "the version to restore is already current".into(),
                    ));
                }
                if let Some(credential) = source.credential.as_ref().filter(|c| c.credentials_deleted)
                {
                    return Err(LifecycleError::CredentialNotFound(format!(
                        "api key {} was deleted",
                        credential.api_key_id
                    )));
                }
                let sealed = source.sealed_payload.as_deref().ok_or_else(|| {
                    LifecycleError::Validation(format!(
                        "payload of version {} was purged",
                        source.id
                    ))
                })?;
                let payload = self.sealer.open(id, source.id, sealed)?;

                let version_id = Uuid::new_v4();
                let restored = VersionRecord {
                    id: version_id,
                    creation_date: Utc::now(),
                    created_by: actor.to_string(),
                    auto_rotated: false,
                    custom_metadata,
                    sealed_payload: Some(self.sealer.seal(id, version_id, &payload)?),
                    certificate: None,
                    credential: source.credential.clone(),
                };
                record.versions.append(restored);
                record.last_update_date = Utc::now();
                record.reschedule();
                self.secret_view(record)
            })
            .await?;
        info!(secret_id = %id, version = %version, "Secret version restored");
        Ok(view)
    }

    /// Revokes one certificate version, or every certificate of a private
    /// certificate secret when `version` is `None`.
    ///
    /// Revoking the current certificate or the whole secret destroys the
    /// secret.
    pub async fn revoke(
        &self,
        id: Uuid,
        version: Option<VersionRef>,
    ) -> Result<SecretMetadata, LifecycleError> {
        let record = self.snapshot(id).await?;
        record.require_type("revoke", &[SecretType::PrivateCert, SecretType::PublicCert])?;

        let whole_secret = version.is_none() && record.secret_type() == SecretType::PrivateCert;
        let targets: Vec<(Uuid, String)> = if whole_secret {
            if record.revocation_time.is_some() {
                return Err(LifecycleError::AlreadyRevoked(format!("secret {id}")));
            }
            if record.locks.any_locked() {
                return Err(LifecycleError::SecretLocked {
                    id,
                    locks: record.locks.total(),
                });
            }
            record
                .versions
                .iter_newest_first()
                .filter(|v| !v.is_revoked())
                .filter_map(|v| v.certificate.as_ref().map(|c| (v.id, c.serial_number.clone())))
                .collect()
        } else {
            let target = record
                .versions
                .resolve(id, version.unwrap_or(VersionRef::Current))?;
            if target.is_revoked() {
                return Err(LifecycleError::AlreadyRevoked(format!("version {}", target.id)));
            }
            if record.locks.is_locked(target.id) {
                return Err(LifecycleError::SecretLocked {
                    id,
                    locks: record.locks.count(target.id),
                });
            }
            let certificate = target.certificate.as_ref().ok_or_else(|| {
                LifecycleError::InvalidState(format!("version {} has no certificate", target.id))
            })?;
            vec![(target.id, certificate.serial_number.clone())]
        };

        for (_, serial) in &targets {
            self.authority
                .revoke(serial)
                .await
                .map_err(|e| LifecycleError::IssuanceFailed { id, reason: e.0 })?;
        }

        let now = Utc::now();
        let metadata = self
            .mutate(id, |record| {
                let mut destroy = whole_secret;
                for (version_id, _) in &targets {
                    let target = record.versions.resolve_mut(id, VersionRef::Id(*version_id))?;
                    if let Some(certificate) = target.certificate.as_mut() {
                        certificate.revocation_time.get_or_insert(now);
                    }
                    if record.versions.current().map(|v| v.id) == Some(*version_id) {
                        destroy = true;
                    }
                }
                if whole_secret {
                    record.revocation_time = Some(now);
                }
                if destroy {
                    record.transition(SecretState::Destroyed)?;
                    record.policy.unschedule();
                }
                record.last_update_date = now;
                Ok(SecretMetadata::new(record))
            })
            .await?;

        warn!(
            secret_id = %id,
            certificates = targets.len(),
            whole_secret,
            "Certificates revoked"
        );
        Ok(metadata)
    }

    /// Deletes an IAM API key or service ID through the provider and marks
    /// every version using it.
    pub async fn delete_credentials(
        &self,
        id: Uuid,
        credential: CredentialRef,
    ) -> Result<SecretMetadata, LifecycleError> {
        let record = self.snapshot(id).await?;
        record.require_type("delete_credentials", &[SecretType::IamCredentials])?;

        let live = record.versions.iter_newest_first().any(|v| {
            v.credential
                .as_ref()
                .is_some_and(|c| !c.credentials_deleted && credential.matches(c))
        });
        if !live {
            return Err(LifecycleError::CredentialNotFound(credential.to_string()));
        }

        let removed = match &credential {
            CredentialRef::ApiKeyId(key) => self.credentials.delete_api_key(key).await,
            CredentialRef::ServiceId(service) => self.credentials.delete_service_id(service).await,
        }
        .map_err(|e| LifecycleError::IssuanceFailed { id, reason: e.0 })?;
        if !removed {
            return Err(LifecycleError::CredentialNotFound(credential.to_string()));
        }

        let metadata = self
            .mutate(id, |record| {
                let mut marked = 0;
                for version in record.versions.iter_mut() {
                    if let Some(c) = version.credential.as_mut() {
                        if !c.credentials_deleted && credential.matches(c) {
                            c.credentials_deleted = true;
                            marked += 1;
                        }
                    }
                }
                if marked == 0 {
                    return Err(LifecycleError::CredentialNotFound(credential.to_string()));
                }
                record.last_update_date = Utc::now();
                Ok(SecretMetadata::new(record))
            })
            .await?;

        warn!(secret_id = %id, credential = %credential, "IAM credentials deleted");
        Ok(metadata)
    }

    // ========================================================================
    // Public certificate issuance
    // ========================================================================

    /// Confirms that the manual DNS challenges are published and, if they
    /// are, places the certificate order.
    pub async fn validate_dns_challenge(
        &self,
        id: Uuid,
        actor: &str,
    ) -> Result<SecretMetadata, LifecycleError> {
        let record = self.snapshot(id).await?;
        record.require_type("validate_dns_challenge", &[SecretType::PublicCert])?;
        let SecretKind::PublicCert(attrs) = &record.kind else {
            return Err(LifecycleError::InvalidState(format!("secret {id} is not a public certificate")));
        };
        if attrs.dns_mode != DnsMode::Manual {
            return Err(LifecycleError::Validation(
                "DNS challenges of this secret are answered automatically".into(),
            ));
        }
        let pending = |state: IssuanceState| {
            matches!(
                state,
                IssuanceState::ChallengesPending | IssuanceState::ValidationFailed
            )
        };
        let info = attrs
            .issuance_info
            .as_ref()
            .filter(|i| pending(i.state))
            .ok_or_else(|| {
                LifecycleError::InvalidState(format!("secret {id} has no pending DNS challenges"))
            })?;

        let validated = self
            .authority
            .validate_challenges(&info.challenges)
            .await
            .map_err(|e| LifecycleError::IssuanceFailed { id, reason: e.0 })?;
        let rotate_keys = record.policy.policy().rotate_keys;
        let order_request = public_request(attrs, rotate_keys);

        let now = Utc::now();
        let (metadata, auto_rotated) = self
            .mutate(id, |record| {
                let info = issuance_mut(&mut record.kind)
                    .and_then(Option::as_mut)
                    .filter(|i| pending(i.state))
                    .ok_or_else(|| {
                        LifecycleError::InvalidState(format!(
                            "secret {id} has no pending DNS challenges"
                        ))
                    })?;
                info.dns_challenge_validation_time = Some(now);
                if validated {
                    info.state = IssuanceState::ChallengesValidated;
                    info.error_message = None;
                } else {
                    info.state = IssuanceState::ValidationFailed;
                    info.error_message = Some("DNS challenge records were not found".into());
                }
                let auto_rotated = info.auto_rotated;
                record.last_update_date = now;
                Ok((SecretMetadata::new(record), auto_rotated))
            })
            .await?;

        if validated {
            info!(secret_id = %id, "DNS challenges validated, ordering certificate");
            self.spawn_order(id, order_request, auto_rotated, actor.to_string(), Map::new())
                .await;
        } else {
            warn!(secret_id = %id, "DNS challenge validation failed");
        }
        Ok(metadata)
    }

    /// Waits for the outstanding certificate order of a public certificate.
    pub async fn await_issuance(&self, id: Uuid) -> Result<SecretView, LifecycleError> {
        self.snapshot(id)
            .await?
            .require_type("await_issuance", &[SecretType::PublicCert])?;
        self.issuance.wait(id).await;

        let record = self.snapshot(id).await?;
        match record.kind.issuance_info() {
            Some(info) if info.state == IssuanceState::TimedOut => {
                Err(LifecycleError::IssuanceTimeout {
                    id,
                    after_secs: self.issuance.timeout().as_secs(),
                })
            }
            Some(info) if info.state == IssuanceState::Failed => Err(LifecycleError::IssuanceFailed {
                id,
                reason: info.error_message.clone().unwrap_or_default(),
            }),
            _ => self.secret_view(&record),
        }
    }

    async fn spawn_order(
        &self,
        id: Uuid,
        request: PublicCertRequest,
        auto_rotated: bool,
        actor: String,
        custom_metadata: Map<String, Value>,
    ) {
        let engine = self.clone();
        let timeout = self.issuance.timeout();
        let order = move |generation| async move {
            let ordered = tokio::time::timeout(timeout, engine.authority.order_public(&request)).await;
            let outcome = match ordered {
                Ok(Ok(issued)) => {
                    engine
                        .complete_order(id, issued, request.rotate_keys, auto_rotated, &actor, custom_metadata)
                        .await
                }
                Ok(Err(e)) => engine.fail_order(id, IssuanceState::Failed, e.0).await,
                Err(_) => {
                    engine
                        .fail_order(
                            id,
                            IssuanceState::TimedOut,
                            format!("no certificate after {}s", timeout.as_secs()),
                        )
                        .await
                }
            };
            if let Err(e) = outcome {
                warn!(secret_id = %id, error = %e, "Could not record issuance outcome");
            }
            engine.issuance.finish(id, generation).await;
        };
        self.issuance.start(id, order).await;
    }

    async fn complete_order(
        &self,
        id: Uuid,
        issued: IssuedCertificate,
        rotate_keys: bool,
        auto_rotated: bool,
        actor: &str,
        custom_metadata: Map<String, Value>,
    ) -> Result<(), LifecycleError> {
        let mut prepared = PreparedVersion::certificate(SecretType::PublicCert, issued);
        if !rotate_keys {
            let record = self.snapshot(id).await?;
            if let (Some(SecretPayload::PublicCert(previous)), SecretPayload::PublicCert(bundle)) =
                (self.open_current(&record)?, &mut prepared.payload)
            {
                if previous.private_key.is_some() {
                    bundle.private_key = previous.private_key;
                }
            }
        }
        let version = self.seal_version(id, prepared, actor, auto_rotated, custom_metadata)?;
        let version_id = version.id;

        self.mutate(id, |record| {
            record.versions.append(version);
            if let Some(Some(info)) = issuance_mut(&mut record.kind) {
                info.state = IssuanceState::Issued;
                info.error_message = None;
                info.challenges.clear();
            }
            if record.state == SecretState::PreActivation {
                record.transition(SecretState::Active)?;
            }
            record.last_update_date = Utc::now();
            record.reschedule();
            Ok(())
        })
        .await?;

        info!(secret_id = %id, version_id = %version_id, "Public certificate issued");
        Ok(())
    }

    async fn fail_order(
        &self,
        id: Uuid,
        state: IssuanceState,
        reason: String,
    ) -> Result<(), LifecycleError> {
        warn!(secret_id = %id, state = ?state, reason = %reason, "Certificate order failed");
        let now = Utc::now();
        self.mutate(id, |record| {
            let mut auto_rotated = false;
            if let Some(Some(info)) = issuance_mut(&mut record.kind) {
                info.state = state;
                info.error_message = Some(reason.clone());
                auto_rotated = info.auto_rotated;
            }
            if auto_rotated {
                record.policy.record_failure(now, reason);
            }
            record.last_update_date = now;
            Ok(())
        })
        .await
    }

    async fn resume_orders(&self) {
        for record in self.live_snapshots().await {
            let SecretKind::PublicCert(attrs) = &record.kind else {
                continue;
            };
            let Some(info) = attrs.issuance_info.as_ref() else {
                continue;
            };
            if matches!(
                info.state,
                IssuanceState::Ordered | IssuanceState::ChallengesValidated
            ) {
                info!(secret_id = %record.id, "Resuming certificate order");
                let request = public_request(attrs, record.policy.policy().rotate_keys);
                self.spawn_order(
                    record.id,
                    request,
                    info.auto_rotated,
                    record.created_by.clone(),
                    Map::new(),
                )
                .await;
            }
        }
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Adds locks to a version.
    ///
    /// With `Exclusive` or `ExclusiveDelete` the same names are taken off
    /// the preceding version; `ExclusiveDelete` then purges its payload if it
    /// holds no other lock. A mode on the `previous` version is ignored.
    /// Destroyed secrets cannot be locked.
    pub async fn lock_version(
        &self,
        id: Uuid,
        version: VersionRef,
        specs: Vec<LockSpec>,
        mode: LockMode,
        actor: &str,
    ) -> Result<VersionLocks, LifecycleError> {
        validate_specs(&specs)?;
        let now = Utc::now();

        let (locks, purged) = self
            .mutate(id, |record| {
                if record.state == SecretState::Destroyed {
                    return Err(LifecycleError::InvalidState(format!(
                        "secret {id} is destroyed and cannot be locked"
                    )));
                }
                let target = record.versions.resolve(id, version)?.id;
                let mode = if record.versions.previous().map(|v| v.id) == Some(target) {
                    LockMode::None
                } else {
                    mode
                };
                let preceding = record.versions.preceding(target).map(|v| v.id);
                let outcome = record
                    .locks
                    .acquire(id, target, preceding, &specs, mode, actor, now)?;

                let mut purged = None;
                if let Some(candidate) = outcome.purge_candidate {
                    let is_current = record.versions.current().map(|v| v.id) == Some(candidate);
                    if !is_current
                        && !record.locks.is_locked(candidate)
                        && record
                            .versions
                            .resolve_mut(id, VersionRef::Id(candidate))?
                            .purge_payload()
                    {
                        purged = Some(candidate);
                    }
                }
                record.last_update_date = now;
                Ok((
                    VersionLocks {
                        secret_id: id,
                        version_id: target,
                        alias: record.versions.alias_of(target),
                        locks: outcome.locks,
                    },
                    purged,
                ))
            })
            .await?;

        info!(
            secret_id = %id,
            version_id = %locks.version_id,
            locks = locks.locks.len(),
            mode = ?mode,
            "Version locked"
        );
        if let Some(purged) = purged {
            warn!(secret_id = %id, version_id = %purged, "Payload of unlocked version purged");
        }
        Ok(locks)
    }

    /// Removes named locks from a version; `["*"]` removes them all.
    pub async fn unlock_version(
        &self,
        id: Uuid,
        version: VersionRef,
        names: Vec<String>,
    ) -> Result<VersionLocks, LifecycleError> {
        let locks = self
            .mutate(id, |record| {
                let target = record.versions.resolve(id, version)?.id;
                let remaining = record.locks.release(target, &names)?;
                record.last_update_date = Utc::now();
                Ok(VersionLocks {
                    secret_id: id,
                    version_id: target,
                    alias: record.versions.alias_of(target),
                    locks: remaining,
                })
            })
            .await?;
        info!(
            secret_id = %id,
            version_id = %locks.version_id,
            remaining = locks.locks.len(),
            "Version unlocked"
        );
        Ok(locks)
    }

    /// Whether a version holds any lock.
    pub async fn is_locked(&self, id: Uuid, version: VersionRef) -> Result<bool, LifecycleError> {
        let record = self.snapshot(id).await?;
        let target = record.versions.resolve(id, version)?;
        Ok(record.locks.is_locked(target.id))
    }

    /// Locks of one version, or of every version when `version` is `None`.
    pub async fn list_locks(
        &self,
        id: Uuid,
        version: Option<VersionRef>,
        search: Option<&str>,
        page: Pagination,
    ) -> Result<Page<Lock>, LifecycleError> {
        let record = self.snapshot(id).await?;
        let target = version
            .map(|v| record.versions.resolve(id, v).map(|v| v.id))
            .transpose()?;
        Ok(record.locks.list(target, search, page))
    }

    // ========================================================================
    // Rotation policies
    // ========================================================================

    /// Replaces the rotation policy and recomputes the schedule.
    pub async fn put_policy(
        &self,
        id: Uuid,
        policy: RotationPolicy,
    ) -> Result<PolicyView, LifecycleError> {
        let view = self
            .mutate(id, |record| {
                let secret_type = record.secret_type();
                record
                    .policy
                    .put(policy, secret_type, record.versions.current())?;
                record.last_update_date = Utc::now();
                Ok(PolicyView {
                    secret_id: id,
                    rotation: record.policy.policy().clone(),
                    status: record.policy.status().clone(),
                })
            })
            .await?;
        info!(secret_id = %id, auto_rotate = view.rotation.auto_rotate, "Rotation policy updated");
        Ok(view)
    }

    /// The rotation policy and its status.
    pub async fn get_policy(&self, id: Uuid) -> Result<PolicyView, LifecycleError> {
        let record = self.snapshot(id).await?;
        Ok(PolicyView {
            secret_id: id,
            rotation: record.policy.policy().clone(),
            status: record.policy.status().clone(),
        })
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Creates a secret group.
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<String>,
        extra_fields: Map<String, Value>,
    ) -> Result<SecretGroup, LifecycleError> {
        self.groups
            .create(name, description, extra_fields, self.actor())
            .await
    }

    /// Fetches a secret group.
    pub async fn get_group(&self, id: &str) -> Result<SecretGroup, LifecycleError> {
        self.groups.get(id).await
    }

    /// All secret groups.
    pub async fn list_groups(&self) -> Vec<SecretGroup> {
        self.groups.list().await
    }

    /// Updates a secret group.
    pub async fn update_group(
        &self,
        id: &str,
        update: GroupUpdate,
    ) -> Result<SecretGroup, LifecycleError> {
        self.groups.update(id, update, self.actor()).await
    }

    /// Deletes an empty secret group.
    pub async fn delete_group(&self, id: &str) -> Result<(), LifecycleError> {
        let mut groups = self.groups.exclusive().await;
        if groups.contains_key(id) {
            let index = self.secrets.read().await;
            let mut members = 0;
            for cell in index.values() {
                let record = cell.load().await;
                if !record.is_deleted() && record.secret_group_id == id {
                    members += 1;
                }
            }
            if members > 0 {
                return Err(LifecycleError::GroupNotEmpty {
                    id: id.to_string(),
                    secrets: members,
                });
            }
        }
        self.groups.remove(&mut groups, id, self.actor()).await?;
        info!(group_id = %id, "Secret group deleted");
        Ok(())
    }

    // ========================================================================
    // Engine configuration
    // ========================================================================

    /// Replaces the configuration of a secrets engine.
    ///
    /// An IAM API key is handed to the credential provider first and only
    /// stored, sealed, once the provider accepted it.
    pub async fn configure(
        &self,
        update: ConfigurationUpdate,
    ) -> Result<Configuration, LifecycleError> {
        update.validate()?;
        let stored = match update {
            ConfigurationUpdate::PublicCert(config) => StoredConfiguration {
                configuration: Configuration::PublicCert(config),
                sealed_api_key: None,
            },
            ConfigurationUpdate::PrivateCert(config) => StoredConfiguration {
                configuration: Configuration::PrivateCert(config),
                sealed_api_key: None,
            },
            ConfigurationUpdate::IamCredentials { api_key } => {
                let api_key = Zeroizing::new(api_key);
                self.credentials.configure(&api_key).await.map_err(|e| {
                    LifecycleError::Validation(format!("API key was not accepted: {e}"))
                })?;
                StoredConfiguration {
                    configuration: Configuration::IamCredentials(IamConfiguration {
                        api_key_hash: kdf::fingerprint(api_key.as_bytes()),
                    }),
                    sealed_api_key: Some(self.sealer.seal_setting(IAM_API_KEY_SETTING, &api_key)?),
                }
            }
        };
        self.configuration.put(stored, self.actor()).await
    }

    /// The configuration of a secrets engine.
    pub async fn get_configuration(
        &self,
        secret_type: SecretType,
    ) -> Result<Configuration, LifecycleError> {
        self.configuration.get(secret_type).await
    }

    // ========================================================================
    // Scheduler support
    // ========================================================================

    /// Active secrets whose rotation is due at `now`. Secrets with a
    /// certificate order in flight are left alone.
    pub async fn due_rotations(&self, now: DateTime<Utc>) -> Vec<DueRotation> {
        self.live_snapshots()
            .await
            .into_iter()
            .filter(|r| r.state == SecretState::Active)
            .filter(|r| r.policy.is_due(now) && !r.issuance_in_flight())
            .filter_map(|r| {
                r.versions.current().map(|v| DueRotation {
                    secret_id: r.id,
                    expected_current: v.id,
                })
            })
            .collect()
    }

    /// Rotates a secret found due, unless it was rotated in the meantime.
    pub async fn rotate_scheduled(
        &self,
        due: DueRotation,
    ) -> Result<ScheduledOutcome, LifecycleError> {
        let record = self.snapshot(due.secret_id).await?;
        if record.versions.current().map(|v| v.id) != Some(due.expected_current) {
            return Ok(ScheduledOutcome::Skipped);
        }
        let request = RotateRequest::generate(SCHEDULER_ACTOR);
        let outcome = self
            .acting_as(SCHEDULER_ACTOR)
            .rotate_record(record, request, true, Some(due.expected_current))
            .await?;
        Ok(match outcome {
            Some(_) => ScheduledOutcome::Rotated,
            None => ScheduledOutcome::Skipped,
        })
    }

    /// Marks the due rotation of a secret as failed.
    pub async fn record_rotation_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        reason: String,
    ) -> Result<(), LifecycleError> {
        self.acting_as(SCHEDULER_ACTOR)
            .mutate(id, |record| {
                record.policy.record_failure(at, reason);
                Ok(())
            })
            .await
    }

    /// Deactivates active secrets whose expiration date has passed.
    pub async fn deactivate_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, LifecycleError> {
        let expired = |r: &SecretRecord| {
            r.state == SecretState::Active && r.expiration_date.is_some_and(|e| e <= now)
        };
        let candidates: Vec<Uuid> = self
            .live_snapshots()
            .await
            .into_iter()
            .filter(|r| expired(r))
            .map(|r| r.id)
            .collect();

        let scheduler = self.acting_as(SCHEDULER_ACTOR);
        let mut deactivated = Vec::with_capacity(candidates.len());
        for id in candidates {
            let changed = scheduler
                .mutate(id, |record| {
                    if !expired(record) {
                        return Ok(false);
                    }
                    record.transition(SecretState::Deactivated)?;
                    record.policy.unschedule();
                    record.last_update_date = now;
                    Ok(true)
                })
                .await?;
            if changed {
                info!(secret_id = %id, "Expired secret deactivated");
                deactivated.push(id);
            }
        }
        Ok(deactivated)
    }
}
