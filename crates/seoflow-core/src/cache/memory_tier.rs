use super::{CacheEntry, DistributedTier};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory stand-in for the distributed tier (development/testing).
///
/// Cloning shares the underlying maps, so several caches in one process can
/// simulate a process group talking to the same key/value service.
#[derive(Clone, Default)]
pub struct MemoryTier {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    leases: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryTier {
    /// Create an empty tier
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing in-memory distributed cache tier");
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the tier holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).filter(|e| !e.is_expired()).cloned())
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.key.clone(), entry.clone());
        debug!(key = %entry.key, "Entry stored in memory tier");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.write().await;
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        leases.insert(key.to_string(), (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool> {
        let mut leases = self.leases.write().await;
        match leases.get(key) {
            Some((holder, _)) if holder == owner => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lease_held(&self, key: &str) -> Result<bool> {
        let leases = self.leases.read().await;
        Ok(leases
            .get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now()))
    }
}
