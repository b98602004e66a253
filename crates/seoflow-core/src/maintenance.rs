//! Session maintenance
//!
//! Periodically expires idle sessions, drops their session-scoped cache
//! entries and evicts expired in-process cache entries.

use crate::cache::{Scope, TwoTierCache};
use crate::context::ContextStore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn default_idle_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are deleted
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// Idle TTL as a duration
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Sweep interval as a duration
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Ids of deleted sessions
    pub expired_sessions: Vec<String>,
    /// Session-scoped cache entries dropped with them
    pub invalidated_entries: usize,
    /// Expired in-process cache entries evicted
    pub local_evicted: usize,
}

/// Background sweeper for idle sessions
pub struct SessionSweeper {
    store: Arc<dyn ContextStore>,
    cache: Arc<TwoTierCache>,
    config: SessionConfig,
}

impl SessionSweeper {
    /// Create a sweeper
    pub fn new(
        store: Arc<dyn ContextStore>,
        cache: Arc<TwoTierCache>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Run one sweep
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let local_evicted = self.cache.sweep_local();
        let expired_sessions = self.store.expire_idle(self.config.idle_ttl()).await?;

        let mut invalidated_entries = 0;
        for session_id in &expired_sessions {
            match self
                .cache
                .invalidate_scope(&Scope::Session(session_id.clone()))
                .await
            {
                Ok(n) => invalidated_entries += n,
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to drop cache of expired session"
                    )
                }
            }
        }

        if expired_sessions.is_empty() {
            debug!(local_evicted = local_evicted, "Sweep found no idle sessions");
        } else {
            info!(
                expired = expired_sessions.len(),
                invalidated = invalidated_entries,
                local_evicted = local_evicted,
                "Expired idle sessions"
            );
        }

        Ok(SweepReport {
            expired_sessions,
            invalidated_entries,
            local_evicted,
        })
    }

    /// Sweep every `sweep_interval` until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            idle_ttl_secs = self.config.idle_ttl_secs,
            "Session sweeper starting"
        );

        let interval = self.config.sweep_interval();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Session sweep failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Fingerprint, MemoryTier};
    use crate::context::{ContextDelta, MemoryContextStore};
    use serde_json::json;

    fn sweeper(idle_ttl_secs: u64) -> (SessionSweeper, Arc<dyn ContextStore>, Arc<TwoTierCache>) {
        let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());
        let cache = Arc::new(TwoTierCache::new(Arc::new(MemoryTier::new())));
        let config = SessionConfig {
            idle_ttl_secs,
            sweep_interval_secs: 1,
        };
        (
            SessionSweeper::new(store.clone(), cache.clone(), config),
            store,
            cache,
        )
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_sessions_and_their_cache() {
        let (sweeper, store, cache) = sweeper(0);

        store.create_if_absent("idle").await.unwrap();
        store
            .put("idle", &ContextDelta::new().set("business_info", json!({})), 0)
            .await
            .unwrap();

        let session_key = Fingerprint::builder("business_info.process")
            .scope(Scope::Session("idle".to_string()))
            .input("x", &1)
            .unwrap()
            .build();
        let global_key = Fingerprint::builder("keywords.generate")
            .input("x", &1)
            .unwrap()
            .build();
        cache.write_value(session_key.as_str(), &"brief", None).await.unwrap();
        cache.write_value(global_key.as_str(), &"rows", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.expired_sessions, vec!["idle".to_string()]);
        assert_eq!(report.invalidated_entries, 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(cache.read_value::<String>(session_key.as_str()).await.is_none());
        assert_eq!(
            cache.read_value::<String>(global_key.as_str()).await.as_deref(),
            Some("rows")
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_sessions() {
        let (sweeper, store, _) = sweeper(3600);
        store.create_if_absent("active").await.unwrap();

        let report = sweeper.sweep_once().await.unwrap();

        assert!(report.expired_sessions.is_empty());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _, _) = sweeper(3600);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), sweeper.run(shutdown))
            .await
            .unwrap();
    }
}
