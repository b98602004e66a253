//! SQLite context storage backend
//!
//! One row per session. The `version` column is the optimistic concurrency
//! token: `put` issues a single `UPDATE ... WHERE version = ?`, so the
//! compare-and-swap and the write are the same atomic statement.
//!
//! # Usage
//!
//! ```no_run
//! use seoflow_core::context::SqliteContextStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Default location: ~/.seoflow/context.db
//! let store = SqliteContextStore::new_default().await?;
//!
//! // Or specify a custom path
//! let store = SqliteContextStore::new("/path/to/context.db").await?;
//! # Ok(())
//! # }
//! ```

use super::{ClientContext, ContextDelta, ContextField, ContextStore, MemoryContextStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default pool size
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

type ContextRow = (String, i64, String, String, String);

/// SQLite context store
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Create a new SQLite store at the specified path
    ///
    /// # Errors
    ///
    /// Returns error if database creation or migration fails.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Create a new SQLite store with a custom pool size
    pub async fn with_options(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Internal(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| Error::Configuration(format!("Invalid SQLite path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to SQLite: {}", e)))?;

        let store = Self { pool };
        store.init_schema().await?;

        info!(path = %path.display(), "SQLite context store initialized");
        Ok(store)
    }

    /// Create a store at the default location (~/.seoflow/context.db)
    pub async fn new_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::new(&path).await
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Internal("Could not determine home directory".to_string()))?;
        Ok(home.join(".seoflow").join("context.db"))
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS client_contexts (
                session_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0,
                fields TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create client_contexts table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_client_contexts_last_accessed
            ON client_contexts(last_accessed_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create index: {}", e)))?;

        debug!("SQLite context schema initialized");
        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(true)
    }

    async fn current_version(&self, session_id: &str) -> Result<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM client_contexts WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v as u64))
    }
}

/// Fixed-width timestamps keep lexicographic and chronological order aligned
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("bad timestamp '{}': {}", raw, e)))
}

fn decode_row(row: ContextRow) -> Result<ClientContext> {
    let (session_id, version, fields, created_at, last_accessed_at) = row;
    let fields: BTreeMap<String, ContextField> = serde_json::from_str(&fields)
        .map_err(|e| Error::Serialization(format!("Failed to deserialize context: {}", e)))?;

    Ok(ClientContext {
        session_id,
        version: version as u64,
        fields,
        created_at: parse_ts(&created_at)?,
        last_accessed_at: parse_ts(&last_accessed_at)?,
    })
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn get(&self, session_id: &str) -> Result<ClientContext> {
        let row: Option<ContextRow> = sqlx::query_as(
            "SELECT session_id, version, fields, created_at, last_accessed_at \
             FROM client_contexts WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => decode_row(row),
            None => Err(Error::NotFound(format!("session {}", session_id))),
        }
    }

    async fn put(
        &self,
        session_id: &str,
        delta: &ContextDelta,
        expected_version: u64,
    ) -> Result<u64> {
        let current = self.get(session_id).await?;
        if current.version != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let next = current.apply(delta);
        let fields = serde_json::to_string(&next.fields)?;

        let result = sqlx::query(
            r#"
            UPDATE client_contexts
            SET version = ?, fields = ?, last_accessed_at = ?
            WHERE session_id = ? AND version = ?
            "#,
        )
        .bind(next.version as i64)
        .bind(&fields)
        .bind(format_ts(next.last_accessed_at))
        .bind(session_id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race between the read above and the UPDATE
            return match self.current_version(session_id).await? {
                Some(actual) => Err(Error::VersionConflict {
                    expected: expected_version,
                    actual,
                }),
                None => Err(Error::NotFound(format!("session {}", session_id))),
            };
        }

        debug!(session_id = %session_id, version = next.version, "Context saved to SQLite");
        Ok(next.version)
    }

    async fn create_if_absent(&self, session_id: &str) -> Result<ClientContext> {
        let fresh = ClientContext::new(session_id);

        let result = sqlx::query(
            r#"
            INSERT INTO client_contexts (session_id, version, fields, created_at, last_accessed_at)
            VALUES (?, 0, '{}', ?, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(format_ts(fresh.created_at))
        .bind(format_ts(fresh.last_accessed_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(session_id = %session_id, "Session created");
        }
        self.get(session_id).await
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE client_contexts SET last_accessed_at = ? WHERE session_id = ?")
                .bind(format_ts(Utc::now()))
                .bind(session_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM client_contexts WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        debug!(session_id = %session_id, deleted = deleted, "Session deleted from SQLite");
        Ok(deleted)
    }

    async fn expire_idle(&self, idle_ttl: Duration) -> Result<Vec<String>> {
        let ttl = chrono::Duration::from_std(idle_ttl)
            .map_err(|e| Error::Configuration(format!("idle ttl out of range: {}", e)))?;
        let cutoff = format_ts(Utc::now() - ttl);

        let rows: Vec<(String,)> = sqlx::query_as(
            "DELETE FROM client_contexts WHERE last_accessed_at < ? RETURNING session_id",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        let removed: Vec<String> = rows.into_iter().map(|(id,)| id).collect();
        if !removed.is_empty() {
            info!(removed = removed.len(), "Expired idle sessions");
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM client_contexts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }
}

/// Context store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStoreConfig {
    /// Backend type: "sqlite" (default) or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite database path; relative paths resolve under ~/.seoflow
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_sqlite_path() -> String {
    "context.db".to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Unified context backend wrapping the storage implementations
pub enum ContextBackend {
    /// SQLite storage (default)
    Sqlite(SqliteContextStore),
    /// In-memory storage (for testing only)
    Memory(MemoryContextStore),
}

impl ContextBackend {
    /// Create a context backend from configuration
    pub async fn from_config(config: &ContextStoreConfig) -> Result<Self> {
        match config.backend.as_str() {
            "sqlite" => {
                let configured = PathBuf::from(&config.sqlite_path);
                let path = if configured.is_absolute() {
                    configured
                } else {
                    let home = dirs::home_dir().ok_or_else(|| {
                        Error::Internal("Could not determine home directory".to_string())
                    })?;
                    home.join(".seoflow").join(configured)
                };
                let store = SqliteContextStore::with_options(&path, config.max_connections).await?;
                Ok(Self::Sqlite(store))
            }
            "memory" => Ok(Self::Memory(MemoryContextStore::new())),
            other => Err(Error::Configuration(format!(
                "Unknown context store backend: '{}'. Use 'sqlite' or 'memory'.",
                other
            ))),
        }
    }
}

#[async_trait]
impl ContextStore for ContextBackend {
    async fn get(&self, session_id: &str) -> Result<ClientContext> {
        match self {
            Self::Sqlite(store) => store.get(session_id).await,
            Self::Memory(store) => store.get(session_id).await,
        }
    }

    async fn put(
        &self,
        session_id: &str,
        delta: &ContextDelta,
        expected_version: u64,
    ) -> Result<u64> {
        match self {
            Self::Sqlite(store) => store.put(session_id, delta, expected_version).await,
            Self::Memory(store) => store.put(session_id, delta, expected_version).await,
        }
    }

    async fn create_if_absent(&self, session_id: &str) -> Result<ClientContext> {
        match self {
            Self::Sqlite(store) => store.create_if_absent(session_id).await,
            Self::Memory(store) => store.create_if_absent(session_id).await,
        }
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        match self {
            Self::Sqlite(store) => store.touch(session_id).await,
            Self::Memory(store) => store.touch(session_id).await,
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        match self {
            Self::Sqlite(store) => store.delete(session_id).await,
            Self::Memory(store) => store.delete(session_id).await,
        }
    }

    async fn expire_idle(&self, idle_ttl: Duration) -> Result<Vec<String>> {
        match self {
            Self::Sqlite(store) => store.expire_idle(idle_ttl).await,
            Self::Memory(store) => store.expire_idle(idle_ttl).await,
        }
    }

    async fn count(&self) -> Result<usize> {
        match self {
            Self::Sqlite(store) => store.count().await,
            Self::Memory(store) => store.count().await,
        }
    }
}
