//! Named per-version locks of a single secret.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::model::{Page, Pagination};

/// Name that releases every lock of a version.
pub const RELEASE_ALL: &str = "*";

/// Maximum number of locks across all versions of one secret.
pub const MAX_LOCKS_PER_SECRET: usize = 1000;

const LOCK_NAME_MIN: usize = 2;
const LOCK_NAME_MAX: usize = 30;

/// Side effect applied to the preceding version while locking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Only lock the target version.
    #[default]
    None,
    /// Move same-named locks off the preceding version.
    Exclusive,
    /// Like `Exclusive`, then purge the preceding version's payload if it
    /// holds no lock anymore.
    ExclusiveDelete,
}

impl FromStr for LockMode {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(LockMode::None),
            "exclusive" => Ok(LockMode::Exclusive),
            "exclusive_delete" => Ok(LockMode::ExclusiveDelete),
            other => Err(LifecycleError::Validation(format!(
                "lock mode must be 'exclusive' or 'exclusive_delete': {other}"
            ))),
        }
    }
}

/// A lock requested by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSpec {
    /// Lock name, unique within the version.
    pub name: String,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arbitrary attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl LockSpec {
    /// Lock spec with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            attributes: Map::new(),
        }
    }
}

/// A lock held on a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// Lock name.
    pub name: String,
    /// Free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arbitrary attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Locked secret.
    pub secret_id: Uuid,
    /// Locked version.
    pub version_id: Uuid,
    /// Who took the lock.
    pub created_by: String,
    /// When the lock was first taken.
    pub creation_date: DateTime<Utc>,
    /// When the lock was last replaced.
    pub last_update_date: DateTime<Utc>,
    #[serde(default)]
    seq: u64,
}

/// Result of [`LockTable::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    /// Locks of the target version after the call.
    pub locks: Vec<Lock>,
    /// Names removed from the preceding version.
    pub moved: Vec<String>,
    /// Preceding version left without locks under `ExclusiveDelete`.
    pub purge_candidate: Option<Uuid>,
}

/// All locks of one secret, keyed by version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockTable {
    versions: BTreeMap<Uuid, Vec<Lock>>,
    next_seq: u64,
}

/// Checks a batch of lock specs before anything is mutated.
pub fn validate_specs(specs: &[LockSpec]) -> Result<(), LifecycleError> {
    if specs.is_empty() {
        return Err(LifecycleError::Validation("at least one lock is required".into()));
    }

    let mut seen = HashSet::with_capacity(specs.len());
    for spec in specs {
        validate_name(&spec.name)?;
        if !seen.insert(spec.name.as_str()) {
            return Err(LifecycleError::Validation(format!(
                "duplicate lock name in request: {}",
                spec.name
            )));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if name == RELEASE_ALL {
        return Err(LifecycleError::Validation("lock name '*' is reserved".into()));
    }
    if !(LOCK_NAME_MIN..=LOCK_NAME_MAX).contains(&name.len()) {
        return Err(LifecycleError::Validation(format!(
            "lock name must be {LOCK_NAME_MIN}-{LOCK_NAME_MAX} characters: {name}"
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(LifecycleError::Validation(format!(
            "lock name may only contain letters, digits, '_', '.' and '-': {name}"
        )));
    }
    Ok(())
}

impl LockTable {
    /// Inserts or replaces `specs` on `target`.
    ///
    /// `preceding` is the version appended right before `target`; it is only
    /// touched when `mode` is not [`LockMode::None`]. Purging the payload of
    /// `purge_candidate` is left to the caller, which owns the versions.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &mut self,
        secret_id: Uuid,
        target: Uuid,
        preceding: Option<Uuid>,
        specs: &[LockSpec],
        mode: LockMode,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, LifecycleError> {
        validate_specs(specs)?;

        let existing = self.versions.get(&target);
        let added = specs
            .iter()
            .filter(|s| !existing.is_some_and(|locks| locks.iter().any(|l| l.name == s.name)))
            .count();
        let moved_count = match (mode, preceding.and_then(|p| self.versions.get(&p))) {
            (LockMode::None, _) | (_, None) => 0,
            (_, Some(locks)) => locks
                .iter()
                .filter(|l| specs.iter().any(|s| s.name == l.name))
                .count(),
        };
        if self.total() + added - moved_count > MAX_LOCKS_PER_SECRET {
            return Err(LifecycleError::Validation(format!(
                "a secret can hold at most {MAX_LOCKS_PER_SECRET} locks"
            )));
        }

        let mut moved = Vec::new();
        let mut purge_candidate = None;
        if let (Some(prev), true) = (preceding, mode != LockMode::None) {
            if let Some(locks) = self.versions.get_mut(&prev) {
                locks.retain(|l| {
                    let hit = specs.iter().any(|s| s.name == l.name);
                    if hit {
                        moved.push(l.name.clone());
                    }
                    !hit
                });
            }
            if mode == LockMode::ExclusiveDelete && !self.is_locked(prev) {
                purge_candidate = Some(prev);
            }
            self.versions.retain(|_, locks| !locks.is_empty());
        }

        for spec in specs {
            let seq = self.next_seq;
            let locks = self.versions.entry(target).or_default();
            match locks.iter_mut().find(|l| l.name == spec.name) {
                Some(lock) => {
                    lock.description = spec.description.clone();
                    lock.attributes = spec.attributes.clone();
                    lock.last_update_date = now;
                }
                None => {
                    locks.push(Lock {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        attributes: spec.attributes.clone(),
                        secret_id,
                        version_id: target,
                        created_by: actor.to_string(),
                        creation_date: now,
                        last_update_date: now,
                        seq,
                    });
                    self.next_seq += 1;
                }
            }
        }

        Ok(AcquireOutcome {
            locks: self.locks_of(target).to_vec(),
            moved,
            purge_candidate,
        })
    }

    /// Removes the named locks from `version`; `["*"]` removes all of them.
    /// Absent names are ignored. Returns the remaining locks.
    pub fn release(&mut self, version: Uuid, names: &[String]) -> Result<Vec<Lock>, LifecycleError> {
        if names.is_empty() {
            return Err(LifecycleError::Validation("at least one lock name is required".into()));
        }

        if names.iter().any(|n| n == RELEASE_ALL) {
            if names.len() != 1 {
                return Err(LifecycleError::Validation(
                    "'*' cannot be combined with other lock names".into(),
                ));
            }
            self.versions.remove(&version);
            return Ok(Vec::new());
        }

        if let Some(locks) = self.versions.get_mut(&version) {
            locks.retain(|l| !names.contains(&l.name));
            if locks.is_empty() {
                self.versions.remove(&version);
            }
        }
        Ok(self.locks_of(version).to_vec())
    }

    /// Whether `version` holds at least one lock.
    pub fn is_locked(&self, version: Uuid) -> bool {
        !self.locks_of(version).is_empty()
    }

    /// Whether any version holds a lock.
    pub fn any_locked(&self) -> bool {
        !self.versions.is_empty()
    }

    /// Locks held by `version`, in insertion order.
    pub fn locks_of(&self, version: Uuid) -> &[Lock] {
        self.versions.get(&version).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of locks on `version`.
    pub fn count(&self, version: Uuid) -> usize {
        self.locks_of(version).len()
    }

    /// Number of locks across all versions.
    pub fn total(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    /// Lists locks of one version or of the whole secret, in insertion order,
    /// keeping those whose name contains `search`.
    pub fn list(&self, version: Option<Uuid>, search: Option<&str>, page: Pagination) -> Page<Lock> {
        let mut matches: Vec<&Lock> = match version {
            Some(v) => self.locks_of(v).iter().collect(),
            None => self.versions.values().flatten().collect(),
        };
        if let Some(needle) = search.filter(|s| !s.is_empty()) {
            matches.retain(|l| l.name.contains(needle));
        }
        matches.sort_by_key(|l| l.seq);

        let total = matches.len();
        Page {
            items: page.apply(matches.into_iter().cloned()),
            total,
        }
    }
}
