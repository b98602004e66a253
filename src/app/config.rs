//! Application configuration types

use seoflow_core::{
    CacheConfig, ContextStoreConfig, InvokerConfig, OrchestratorConfig, ResearchConfig,
    SessionConfig,
};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: ContextStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}
