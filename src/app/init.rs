//! Component initialization
//!
//! Builds the context store, cache, invoker and research backend from
//! configuration and wires them into a [`SessionOrchestrator`].

use super::config::AppConfig;
use anyhow::{Context, Result};
use seoflow_core::{
    backend_from_config, CacheBackend, ContextBackend, ContextStore, ResilientInvoker,
    SessionOrchestrator, SessionSweeper, TwoTierCache,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Initialized components
pub struct Runtime {
    pub orchestrator: SessionOrchestrator,
    pub sweeper: SessionSweeper,
    pub shutdown: CancellationToken,
}

impl Runtime {
    /// Cancel running computations and background tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Initialize every component named by `config`
pub async fn init_runtime(config: &AppConfig) -> Result<Runtime> {
    let store: Arc<dyn ContextStore> = Arc::new(
        ContextBackend::from_config(&config.store)
            .await
            .context("Failed to initialize context store")?,
    );
    info!(backend = %config.store.backend, "Context store initialized");

    let cache: Arc<TwoTierCache> = Arc::new(
        CacheBackend::from_config(&config.cache)
            .context("Failed to initialize cache")?
            .into_cache(&config.cache),
    );
    info!(backend = %config.cache.backend, format = %config.cache.format, "Cache initialized");

    let invoker = Arc::new(ResilientInvoker::from_config(&config.invoker));
    let research =
        backend_from_config(&config.research).context("Failed to initialize research backend")?;

    let shutdown = CancellationToken::new();
    let orchestrator = SessionOrchestrator::builder(store.clone(), cache.clone(), invoker, research)
        .config(config.orchestrator.clone())
        .lease_settings(&config.cache)
        .shutdown_token(shutdown.child_token())
        .build();

    let sweeper = SessionSweeper::new(store, cache, config.session.clone());

    Ok(Runtime {
        orchestrator,
        sweeper,
        shutdown,
    })
}
