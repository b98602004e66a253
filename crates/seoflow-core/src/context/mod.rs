//! Context Store - durable, versioned per-session client context
//!
//! Writes use optimistic concurrency: every `put` names the version it was
//! based on and fails with [`Error::VersionConflict`](crate::Error::VersionConflict)
//! when another writer got there first. There is no caller-visible locking.
//!
//! Backends:
//! - SQLite (default, durable)
//! - In-memory (development/testing)

mod memory_store;
mod sqlite_store;
mod types;

pub use memory_store::MemoryContextStore;
pub use sqlite_store::{ContextBackend, ContextStoreConfig, SqliteContextStore};
pub use types::{fields, ClientContext, ContextDelta, ContextField, Session};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Context store trait for abstracting storage backends
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Load the context of a session, `Error::NotFound` if unknown
    async fn get(&self, session_id: &str) -> Result<ClientContext>;

    /// Apply `delta` if the stored version equals `expected_version`.
    ///
    /// Returns the new version (always `expected_version + 1`).
    async fn put(
        &self,
        session_id: &str,
        delta: &ContextDelta,
        expected_version: u64,
    ) -> Result<u64>;

    /// Create an empty context unless one exists; returns the stored context
    async fn create_if_absent(&self, session_id: &str) -> Result<ClientContext>;

    /// Refresh the last-access timestamp without bumping the version
    async fn touch(&self, session_id: &str) -> Result<()>;

    /// Delete a session and its context
    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Delete sessions idle for longer than `idle_ttl`, returning their ids
    async fn expire_idle(&self, idle_ttl: Duration) -> Result<Vec<String>>;

    /// Number of stored sessions
    async fn count(&self) -> Result<usize>;
}
