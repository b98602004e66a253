//! Research collaborators
//!
//! The scraping/summarization and keyword-research services are opaque,
//! long-running upstream operations. The orchestrator only sees them through
//! [`ResearchBackend`] and always calls them through the Resilient Invoker.
//!
//! - [`FixtureBackend`]: deterministic offline data (development, demos, tests)
//! - [`HttpResearchBackend`]: a research service reached over HTTP

mod fixture;
mod http;
mod types;

pub use fixture::FixtureBackend;
pub use http::HttpResearchBackend;
pub use types::{
    BusinessInfo, KeywordKind, KeywordRequest, KeywordRow, Priority, ProcessedProduct, Product,
    DEFAULT_MARKET_GEO,
};

use crate::error::{Error, Result};
use crate::invoker::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Operation name of page summarization
pub const OP_URL_SUMMARY: &str = "scrape.url_summary";
/// Operation name of keyword generation
pub const OP_KEYWORDS: &str = "keywords.generate";

/// Upstream research operations
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Summarize the page at `url`
    async fn summarize_url(&self, url: &str) -> std::result::Result<String, UpstreamError>;

    /// Research keywords for one product
    async fn generate_keywords(
        &self,
        request: &KeywordRequest,
    ) -> std::result::Result<Vec<KeywordRow>, UpstreamError>;
}

fn default_backend() -> String {
    "fixture".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Research backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// "fixture" or "http"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Base URL of the HTTP research service
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token for the HTTP research service
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Transport-level timeout of the HTTP client
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Create the backend named by `config.backend`
pub fn backend_from_config(config: &ResearchConfig) -> Result<Arc<dyn ResearchBackend>> {
    match config.backend.to_lowercase().as_str() {
        "fixture" | "mock" => {
            info!("Using fixture research backend");
            Ok(Arc::new(FixtureBackend::new()))
        }
        "http" => {
            info!(base_url = %config.base_url, "Using HTTP research backend");
            Ok(Arc::new(HttpResearchBackend::new(
                &config.base_url,
                config.api_key.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )?))
        }
        other => Err(Error::Configuration(format!(
            "Unknown research backend: '{}'. Use 'fixture' or 'http'.",
            other
        ))),
    }
}
