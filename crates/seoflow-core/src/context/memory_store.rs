use super::{ClientContext, ContextDelta, ContextStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory context store (for development/testing)
///
/// Data is lost on restart. The compare-and-swap happens under the write
/// lock, so it gives the same guarantees as the SQLite store within one
/// process.
#[derive(Default, Clone)]
pub struct MemoryContextStore {
    contexts: Arc<RwLock<HashMap<String, ClientContext>>>,
}

impl MemoryContextStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing in-memory context store");
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get(&self, session_id: &str) -> Result<ClientContext> {
        let contexts = self.contexts.read().await;
        contexts
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    async fn put(
        &self,
        session_id: &str,
        delta: &ContextDelta,
        expected_version: u64,
    ) -> Result<u64> {
        let mut contexts = self.contexts.write().await;
        let current = contexts
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

        if current.version != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let next = current.apply(delta);
        let version = next.version;
        contexts.insert(session_id.to_string(), next);

        debug!(session_id = %session_id, version = version, "Context updated in memory");
        Ok(version)
    }

    async fn create_if_absent(&self, session_id: &str) -> Result<ClientContext> {
        {
            let contexts = self.contexts.read().await;
            if let Some(context) = contexts.get(session_id) {
                return Ok(context.clone());
            }
        }

        let mut contexts = self.contexts.write().await;
        Ok(contexts
            .entry(session_id.to_string())
            .or_insert_with(|| ClientContext::new(session_id))
            .clone())
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        context.last_accessed_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut contexts = self.contexts.write().await;
        Ok(contexts.remove(session_id).is_some())
    }

    async fn expire_idle(&self, idle_ttl: Duration) -> Result<Vec<String>> {
        let ttl = chrono::Duration::from_std(idle_ttl)
            .map_err(|e| Error::Configuration(format!("idle ttl out of range: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let mut contexts = self.contexts.write().await;
        let expired: Vec<String> = contexts
            .iter()
            .filter(|(_, context)| context.last_accessed_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            contexts.remove(id);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Expired idle sessions from memory");
        }
        Ok(expired)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.contexts.read().await.len())
    }
}
