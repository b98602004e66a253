//! Seoflow Core - Session State & Caching Engine
//!
//! Coordinates the multi-step SEO keyword research workflow for many
//! concurrent sessions:
//! - Context: durable, versioned per-session client context
//! - Cache: two-tier artifact cache keyed by deterministic fingerprints
//! - Singleflight: one in-flight computation per cache key
//! - Invoker: timeout, retry and circuit breaking for upstream calls
//! - Research: the scraping and keyword-research collaborators
//! - Orchestrator: the façade that ties them together
//! - Maintenance: idle session expiry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod context;
pub mod error;
pub mod invoker;
pub mod maintenance;
pub mod orchestrator;
pub mod research;
pub mod singleflight;
pub mod utils;

pub use cache::{
    CacheBackend, CacheConfig, CacheEntry, CacheFormat, CacheLookup, DistributedTier, Fingerprint,
    MemoryTier, RedisTier, Scope, TwoTierCache,
};
pub use context::{
    fields, ClientContext, ContextBackend, ContextDelta, ContextStore, ContextStoreConfig,
    MemoryContextStore, Session, SqliteContextStore,
};
pub use error::{format_failure_for_cli, Error, Failure, FailureKind, Result, UserFriendlyError};
pub use invoker::{
    CallOutcome, InvokePolicy, InvokerConfig, ResilientInvoker, UpstreamCall, UpstreamError,
};
pub use maintenance::{SessionConfig, SessionSweeper, SweepReport};
pub use orchestrator::{
    render_client_brief, ClientContextSummary, KeywordArtifact, Operation, OperationOutput,
    OrchestratorBuilder, OrchestratorConfig, ProcessedBusinessInfo, SessionOrchestrator,
    SubmitAck,
};
pub use research::{
    backend_from_config, BusinessInfo, FixtureBackend, HttpResearchBackend, KeywordKind,
    KeywordRow, Product, ResearchBackend, ResearchConfig,
};
pub use singleflight::Singleflight;
