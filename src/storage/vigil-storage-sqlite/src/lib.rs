//! # Vigil Storage - SQLite Backend
//!
//! Durable storage for secret records. Each tenant is stored in its own
//! database file; every write is applied together with a journal row inside
//! one transaction, so a crash never leaves an entry without its journal
//! trail or the reverse.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use vigil_storage::{StorageBackend, StorageError};

const DEFAULT_ACTOR: &str = "vigil";

/// SQLite backend, one database file per tenant at `{base_path}/{tenant}.db`.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    actor: String,
    db_path: PathBuf,
}

/// A single row of the write journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Key that was written.
    pub key: String,
    /// Entry revision produced by the write.
    pub revision: i64,
    /// `create`, `update` or `delete`.
    pub operation: String,
    /// Who performed the write.
    pub actor: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl SqliteBackend {
    /// Opens or creates the database for `tenant`.
    ///
    /// # Errors
    ///
    /// Fails when the tenant name is not `[a-z0-9_-]{1,64}`, the directory
    /// cannot be created, or the connection cannot be established.
    pub async fn open(base_path: impl AsRef<Path>, tenant: &str) -> Result<Self, StorageError> {
        validate_tenant(tenant)?;

        let base = base_path.as_ref();
        tokio::fs::create_dir_all(base).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("cannot create data directory: {e}"))
        })?;

        let db_path = base.join(format!("{tenant}.db"));
        debug!(tenant = %tenant, path = %db_path.display(), "Opening SQLite database");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self {
            pool,
            actor: DEFAULT_ACTOR.to_string(),
            db_path,
        };
        backend.migrate().await?;

        info!(tenant = %tenant, "SQLite backend ready");
        Ok(backend)
    }

    /// Returns a handle whose unattributed writes are journaled under `actor`.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Path of the tenant database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Journal rows for `key`, oldest first.
    pub async fn journal(&self, key: &str) -> Result<Vec<JournalEntry>, StorageError> {
        let rows: Vec<(String, i64, String, String, i64)> = sqlx::query_as(
            "SELECT key, revision, operation, actor, timestamp FROM journal WHERE key = ? ORDER BY id",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows
            .into_iter()
            .map(|(key, revision, operation, actor, timestamp)| JournalEntry {
                key,
                revision,
                operation,
                actor,
                timestamp,
            })
            .collect())
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        const SCHEMA: [&str; 3] = [
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                revision   INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS journal (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                key        TEXT NOT NULL,
                revision   INTEGER NOT NULL,
                operation  TEXT NOT NULL,
                actor      TEXT NOT NULL,
                timestamp  INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_journal_key ON journal (key)",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;
        }
        Ok(())
    }

    async fn current_revision(
        tx: &mut Transaction<'_, Sqlite>,
        key: &str,
    ) -> Result<Option<i64>, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT revision FROM entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(query_failed)?;
        Ok(row.map(|(r,)| r))
    }

    async fn record(
        tx: &mut Transaction<'_, Sqlite>,
        key: &str,
        revision: i64,
        operation: &str,
        actor: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO journal (key, revision, operation, actor, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(revision)
        .bind(operation)
        .bind(actor)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(query_failed)?;
        Ok(())
    }
}

fn validate_tenant(tenant: &str) -> Result<(), StorageError> {
    if tenant.is_empty() {
        return Err(StorageError::InvalidInput("tenant cannot be empty".into()));
    }
    if tenant.len() > 64 {
        return Err(StorageError::InvalidInput("tenant name too long".into()));
    }
    let valid = tenant
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(StorageError::InvalidInput(
            "tenant must match [a-z0-9_-]+".into(),
        ));
    }
    Ok(())
}

fn query_failed(e: sqlx::Error) -> StorageError {
    StorageError::QueryFailed(e.to_string())
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;
        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put_as(key, value, &self.actor).await
    }

    async fn put_as(&self, key: &str, value: &[u8], actor: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidInput("key cannot be empty".into()));
        }

        let now = unix_now();
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        let (revision, operation) = match Self::current_revision(&mut tx, key).await? {
            Some(r) => (r + 1, "update"),
            None => (1, "create"),
        };

        sqlx::query(
            r#"
            INSERT INTO entries (key, value, revision, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(revision)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(query_failed)?;

        Self::record(&mut tx, key, revision, operation, actor, now).await?;
        tx.commit().await.map_err(query_failed)?;

        debug!(key = %key, revision = revision, actor = %actor, "Entry written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.delete_as(key, &self.actor).await
    }

    async fn delete_as(&self, key: &str, actor: &str) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        let Some(revision) = Self::current_revision(&mut tx, key).await? else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        Self::record(&mut tx, key, revision + 1, "delete", actor, unix_now()).await?;
        tx.commit().await.map_err(query_failed)?;
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // substr comparison keeps `%` and `_` in prefixes literal.
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM entries WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}
