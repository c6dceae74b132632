//! Secret groups.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use vigil_storage::StorageBackend;

use crate::error::LifecycleError;

/// ID of the group every deployment starts with.
pub const DEFAULT_GROUP_ID: &str = "default";

const GROUP_PREFIX: &str = "groups/";

/// A partition of secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretGroup {
    /// Group ID.
    pub id: String,
    /// Unique display name.
    pub name: String,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation timestamp.
    pub creation_date: DateTime<Utc>,
    /// Last update timestamp.
    pub last_update_date: DateTime<Utc>,
    /// Open JSON properties kept alongside the typed fields.
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

/// Fields a caller may change on a group.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GroupUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Properties to merge; `null` removes a property.
    #[serde(default, flatten)]
    pub extra_fields: Map<String, Value>,
}

fn storage_key(id: &str) -> String {
    format!("{GROUP_PREFIX}{id}")
}

fn validate_name(name: &str) -> Result<(), LifecycleError> {
    let len = name.chars().count();
    if !(2..=64).contains(&len) {
        return Err(LifecycleError::Validation(
            "group name must be 2-64 characters".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(LifecycleError::Validation(format!(
            "group name may only contain letters, digits, '_', '.' and '-': {name}"
        )));
    }
    Ok(())
}

/// Persistent set of secret groups.
///
/// The engine holds the read side while creating a secret and the write side
/// while deleting a group, so a group cannot vanish under a secret being
/// created in it.
pub struct GroupRegistry {
    storage: Arc<dyn StorageBackend>,
    groups: RwLock<BTreeMap<String, SecretGroup>>,
}

impl GroupRegistry {
    /// Loads all groups, creating the default group on first start.
    pub async fn load(storage: Arc<dyn StorageBackend>) -> Result<Self, LifecycleError> {
        let mut groups = BTreeMap::new();
        for key in storage.list(GROUP_PREFIX).await? {
            if let Some(raw) = storage.get(&key).await? {
                let group: SecretGroup = serde_json::from_slice(&raw)?;
                groups.insert(group.id.clone(), group);
            }
        }

        if !groups.contains_key(DEFAULT_GROUP_ID) {
            let now = Utc::now();
            let group = SecretGroup {
                id: DEFAULT_GROUP_ID.to_string(),
                name: DEFAULT_GROUP_ID.to_string(),
                description: Some("Default secret group".into()),
                creation_date: now,
                last_update_date: now,
                extra_fields: Map::new(),
            };
            storage
                .put(&storage_key(&group.id), &serde_json::to_vec(&group)?)
                .await?;
            groups.insert(group.id.clone(), group);
        }

        debug!(groups = groups.len(), "Secret groups loaded");
        Ok(Self {
            storage,
            groups: RwLock::new(groups),
        })
    }

    /// Creates a group with a unique name.
    pub async fn create(
        &self,
        name: &str,
        description: Option<String>,
        extra_fields: Map<String, Value>,
        actor: Option<&str>,
    ) -> Result<SecretGroup, LifecycleError> {
        validate_name(name)?;
        let mut groups = self.groups.write().await;
        if groups.values().any(|g| g.name == name) {
            return Err(LifecycleError::AlreadyExists(format!("secret group {name}")));
        }

        let now = Utc::now();
        let group = SecretGroup {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            creation_date: now,
            last_update_date: now,
            extra_fields,
        };
        self.persist(&group, actor).await?;
        groups.insert(group.id.clone(), group.clone());

        info!(group_id = %group.id, name = %group.name, "Secret group created");
        Ok(group)
    }

    /// Fetches a group.
    pub async fn get(&self, id: &str) -> Result<SecretGroup, LifecycleError> {
        self.groups
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(format!("secret group {id}")))
    }

    /// All groups ordered by ID.
    pub async fn list(&self) -> Vec<SecretGroup> {
        self.groups.read().await.values().cloned().collect()
    }

    /// Applies `update` to a group.
    pub async fn update(
        &self,
        id: &str,
        update: GroupUpdate,
        actor: Option<&str>,
    ) -> Result<SecretGroup, LifecycleError> {
        let mut groups = self.groups.write().await;
        if let Some(name) = &update.name {
            validate_name(name)?;
            if groups.values().any(|g| &g.name == name && g.id != id) {
                return Err(LifecycleError::AlreadyExists(format!("secret group {name}")));
            }
        }

        let mut group = groups
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(format!("secret group {id}")))?;

        if let Some(name) = update.name {
            group.name = name;
        }
        if let Some(description) = update.description {
            group.description = Some(description);
        }
        for (key, value) in update.extra_fields {
            if value.is_null() {
                group.extra_fields.remove(&key);
            } else {
                group.extra_fields.insert(key, value);
            }
        }
        group.last_update_date = Utc::now();

        self.persist(&group, actor).await?;
        groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    pub(crate) async fn shared(&self) -> RwLockReadGuard<'_, BTreeMap<String, SecretGroup>> {
        self.groups.read().await
    }

    pub(crate) async fn exclusive(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SecretGroup>> {
        self.groups.write().await
    }

    /// Removes a group while the caller holds the write guard.
    pub(crate) async fn remove(
        &self,
        groups: &mut BTreeMap<String, SecretGroup>,
        id: &str,
        actor: Option<&str>,
    ) -> Result<(), LifecycleError> {
        if id == DEFAULT_GROUP_ID {
            return Err(LifecycleError::InvalidState(
                "the default secret group cannot be deleted".into(),
            ));
        }
        if !groups.contains_key(id) {
            return Err(LifecycleError::NotFound(format!("secret group {id}")));
        }
        match actor {
            Some(actor) => self.storage.delete_as(&storage_key(id), actor).await?,
            None => self.storage.delete(&storage_key(id)).await?,
        };
        groups.remove(id);
        Ok(())
    }

    async fn persist(&self, group: &SecretGroup, actor: Option<&str>) -> Result<(), LifecycleError> {
        let key = storage_key(&group.id);
        let raw = serde_json::to_vec(group)?;
        match actor {
            Some(actor) => self.storage.put_as(&key, &raw, actor).await?,
            None => self.storage.put(&key, &raw).await?,
        }
        Ok(())
    }
}
