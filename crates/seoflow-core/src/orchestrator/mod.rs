//! Session Orchestrator
//!
//! Façade tying the Context Store, Cache Layer, Singleflight Coordinator and
//! Resilient Invoker together. Each request runs
//! `Requested → ContextResolved → CacheChecked → (hit) Completed` or
//! `(miss) Computing → Cached → ContextUpdated → Completed`, ending in either
//! the artifact or one typed [`Failure`].
//!
//! The computation (leader only) writes the cache before its in-flight marker
//! clears. Every caller then applies its own context delta with optimistic
//! concurrency; on a version conflict the step is retried, recomputing only
//! when the inputs changed underneath it.

mod brief;
mod types;

pub use brief::render_client_brief;
pub use types::{
    ClientContextSummary, KeywordArtifact, Operation, OperationOutput, ProcessedBusinessInfo,
    SubmitAck,
};

use crate::cache::{normalize_text, CacheConfig, Fingerprint, Scope, TwoTierCache};
use crate::context::{fields, ClientContext, ContextDelta, ContextStore};
use crate::error::{Error, Failure, FailureKind};
use crate::invoker::ResilientInvoker;
use crate::research::{
    BusinessInfo, KeywordKind, KeywordRequest, ProcessedProduct, ResearchBackend, OP_KEYWORDS,
    OP_URL_SUMMARY,
};
use crate::singleflight::Singleflight;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operation name of business info processing
pub const OP_PROCESS: &str = "business_info.process";

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_keyword_ttl_secs() -> u64 {
    86_400
}

fn default_summary_ttl_secs() -> u64 {
    86_400
}

fn default_max_keywords_per_product() -> usize {
    500
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries of the compute/update step after a version conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Deadline applied when a caller gives none
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TTL of keyword tables and processed business info
    #[serde(default = "default_keyword_ttl_secs")]
    pub keyword_ttl_secs: u64,
    /// TTL of page summaries
    #[serde(default = "default_summary_ttl_secs")]
    pub summary_ttl_secs: u64,
    /// Keywords kept per product
    #[serde(default = "default_max_keywords_per_product")]
    pub max_keywords_per_product: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            keyword_ttl_secs: default_keyword_ttl_secs(),
            summary_ttl_secs: default_summary_ttl_secs(),
            max_keywords_per_product: default_max_keywords_per_product(),
        }
    }
}

impl OrchestratorConfig {
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn keyword_ttl(&self) -> Duration {
        Duration::from_secs(self.keyword_ttl_secs)
    }

    fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_secs)
    }
}

struct Inner {
    store: Arc<dyn ContextStore>,
    cache: Arc<TwoTierCache>,
    invoker: Arc<ResilientInvoker>,
    research: Arc<dyn ResearchBackend>,
    config: OrchestratorConfig,
    lease_ttl: Duration,
    lease_poll: Duration,
    /// Lease owner id of this process
    owner: String,
    processing: Singleflight<ProcessedBusinessInfo>,
    summaries: Singleflight<String>,
    keywords: Singleflight<KeywordArtifact>,
    shutdown: CancellationToken,
}

/// Builder for [`SessionOrchestrator`]
pub struct OrchestratorBuilder {
    store: Arc<dyn ContextStore>,
    cache: Arc<TwoTierCache>,
    invoker: Arc<ResilientInvoker>,
    research: Arc<dyn ResearchBackend>,
    config: OrchestratorConfig,
    lease_ttl: Duration,
    lease_poll: Duration,
    shutdown: CancellationToken,
}

impl OrchestratorBuilder {
    /// Set the orchestrator configuration
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Take lease settings from the cache configuration
    #[must_use]
    pub fn lease_settings(mut self, cache: &CacheConfig) -> Self {
        self.lease_ttl = cache.lease_ttl();
        self.lease_poll = cache.lease_poll_interval();
        self
    }

    /// Set the lease TTL and poll interval directly
    #[must_use]
    pub fn lease(mut self, ttl: Duration, poll_interval: Duration) -> Self {
        self.lease_ttl = ttl;
        self.lease_poll = poll_interval;
        self
    }

    /// Token whose cancellation stops every running computation
    #[must_use]
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the orchestrator
    #[must_use]
    pub fn build(self) -> SessionOrchestrator {
        let owner = Uuid::new_v4().to_string();
        info!(owner = %owner, research = %self.research.name(), "Session orchestrator initialized");

        SessionOrchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                cache: self.cache,
                invoker: self.invoker,
                research: self.research,
                config: self.config,
                lease_ttl: self.lease_ttl,
                lease_poll: self.lease_poll,
                owner,
                processing: Singleflight::new(self.shutdown.clone()),
                summaries: Singleflight::new(self.shutdown.clone()),
                keywords: Singleflight::new(self.shutdown.clone()),
                shutdown: self.shutdown,
            }),
        }
    }
}

/// Outcome of one optimistic context update
enum Commit {
    Committed,
    Retry(ClientContext),
}

/// Result of trying to become the process-group leader for a key
enum Claim<T> {
    Cached(T),
    Leased,
    Unleased,
}

/// Session Orchestrator
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Start building an orchestrator from its collaborators
    pub fn builder(
        store: Arc<dyn ContextStore>,
        cache: Arc<TwoTierCache>,
        invoker: Arc<ResilientInvoker>,
        research: Arc<dyn ResearchBackend>,
    ) -> OrchestratorBuilder {
        let lease = CacheConfig::default();
        OrchestratorBuilder {
            store,
            cache,
            invoker,
            research,
            config: OrchestratorConfig::default(),
            lease_ttl: lease.lease_ttl(),
            lease_poll: lease.lease_poll_interval(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Context Store
    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.inner.store
    }

    /// Cache Layer
    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.inner.cache
    }

    /// Resilient Invoker
    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.inner.invoker
    }

    /// Cancel every running computation
    pub fn shutdown(&self) {
        info!("Session orchestrator shutting down");
        self.inner.shutdown.cancel();
    }

    /// Create a new session and return its id
    pub async fn start_session(&self) -> Result<String, Failure> {
        let session_id = Uuid::new_v4().to_string();
        self.inner.store.create_if_absent(&session_id).await?;
        info!(session_id = %session_id, "Session started");
        Ok(session_id)
    }

    /// Store the normalized business info form.
    ///
    /// Previously processed data is cleared and session-scoped cache entries
    /// are invalidated, since they derive from the old form.
    pub async fn submit_business_info(
        &self,
        session_id: &str,
        info: BusinessInfo,
    ) -> Result<SubmitAck, Failure> {
        self.with_deadline(None, "submit_business_info", self.run_submit(session_id, info))
            .await
    }

    /// Summarize product pages, order products by priority and render the
    /// client brief
    pub async fn process_business_info(
        &self,
        session_id: &str,
    ) -> Result<ClientContextSummary, Failure> {
        let operation = Operation::ProcessBusinessInfo;
        self.with_deadline(None, operation.name(), self.run_process(session_id))
            .await
    }

    /// Research keywords of one funnel stage for every product
    pub async fn generate_keywords(
        &self,
        session_id: &str,
        kind: KeywordKind,
    ) -> Result<KeywordArtifact, Failure> {
        let operation = Operation::GenerateKeywords { kind };
        self.with_deadline(None, operation.name(), self.run_generate_keywords(session_id, kind))
            .await
    }

    /// Read the client context of an existing session
    pub async fn get_client_context(
        &self,
        session_id: &str,
    ) -> Result<ClientContextSummary, Failure> {
        let operation = Operation::GetClientContext;
        self.with_deadline(None, operation.name(), self.run_get_context(session_id))
            .await
    }

    /// A keyword table recorded in the session.
    ///
    /// Tables live in the context, so they outlast the cached artifact.
    pub async fn keyword_table(
        &self,
        session_id: &str,
        table_id: &str,
    ) -> Result<KeywordArtifact, Failure> {
        self.with_deadline(None, "keyword_table", async {
            let context = self
                .resolve_context(session_id, Operation::GetClientContext)
                .await?;
            let mut output: BTreeMap<String, KeywordArtifact> = context
                .get_as(fields::KEYWORDS_OUTPUT)?
                .unwrap_or_default();
            output.remove(table_id).ok_or_else(|| {
                Failure::not_found(format!(
                    "keyword table {} not found in session {}",
                    table_id, session_id
                ))
            })
        })
        .await
    }

    /// Run a typed operation with an optional deadline.
    ///
    /// When the deadline elapses the caller gets `Canceled` at once; shared
    /// work already in flight keeps running for other callers.
    pub async fn execute(
        &self,
        session_id: &str,
        operation: Operation,
        deadline: Option<Duration>,
    ) -> Result<OperationOutput, Failure> {
        let work = async {
            match operation {
                Operation::ProcessBusinessInfo => self
                    .run_process(session_id)
                    .await
                    .map(OperationOutput::Context),
                Operation::GenerateKeywords { kind } => self
                    .run_generate_keywords(session_id, kind)
                    .await
                    .map(OperationOutput::Keywords),
                Operation::GetClientContext => self
                    .run_get_context(session_id)
                    .await
                    .map(OperationOutput::Context),
            }
        };
        self.with_deadline(deadline, operation.name(), work).await
    }

    /// Drop every session-scoped cache entry of `session_id`
    pub async fn invalidate_session_cache(&self, session_id: &str) -> Result<usize, Failure> {
        Ok(self
            .inner
            .cache
            .invalidate_scope(&Scope::Session(session_id.to_string()))
            .await?)
    }

    /// Cache key of a keyword table.
    ///
    /// Global: sessions with the same products, market and kind share it.
    pub fn keyword_fingerprint(
        &self,
        processed: &ProcessedBusinessInfo,
        kind: KeywordKind,
    ) -> Result<Fingerprint, Failure> {
        let products: Vec<serde_json::Value> = processed
            .products_services
            .iter()
            .filter(|p| !p.product.name.trim().is_empty())
            .map(|p| {
                serde_json::json!({
                    "name": normalize_text(&p.product.name),
                    "description": normalize_text(&p.product.description),
                    "target_persona": normalize_text(&p.product.target_persona),
                    "url_summary": normalize_text(&p.url_summary),
                })
            })
            .collect();

        Ok(Fingerprint::builder(OP_KEYWORDS)
            .input("kind", &kind)?
            .input("market_geo", &normalize_text(&processed.market_geo))?
            .input("products", &products)?
            .input(
                "max_keywords_per_product",
                &self.inner.config.max_keywords_per_product,
            )?
            .build())
    }

    /// Cache key of processed business info (private to the session)
    pub fn process_fingerprint(
        &self,
        session_id: &str,
        info: &BusinessInfo,
    ) -> Result<Fingerprint, Failure> {
        Ok(Fingerprint::builder(OP_PROCESS)
            .scope(Scope::Session(session_id.to_string()))
            .input("business_info", info)?
            .build())
    }

    async fn with_deadline<T, Fut>(
        &self,
        deadline: Option<Duration>,
        operation: &str,
        work: Fut,
    ) -> Result<T, Failure>
    where
        Fut: Future<Output = Result<T, Failure>>,
    {
        let deadline = deadline.unwrap_or_else(|| self.inner.config.request_timeout());
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => {
                if let Err(failure) = &result {
                    warn!(
                        operation = %operation,
                        kind = %failure.kind,
                        error = %failure.message,
                        "Request failed"
                    );
                }
                result
            }
            Err(_) => {
                warn!(
                    operation = %operation,
                    deadline_ms = deadline.as_millis() as u64,
                    "Request deadline elapsed"
                );
                Err(Failure::canceled(format!(
                    "{} exceeded its {}ms deadline",
                    operation,
                    deadline.as_millis()
                )))
            }
        }
    }

    /// `Requested → ContextResolved`
    async fn resolve_context(
        &self,
        session_id: &str,
        operation: Operation,
    ) -> Result<ClientContext, Failure> {
        if session_id.trim().is_empty() {
            return Err(Failure::not_found("session id is empty"));
        }

        let store = &self.inner.store;
        let context = if operation.creates_session() {
            store.create_if_absent(session_id).await?
        } else {
            store.get(session_id).await?
        };
        store.touch(session_id).await?;

        debug!(
            session_id = %session_id,
            operation = %operation,
            version = context.version,
            "Context resolved"
        );
        Ok(context)
    }

    fn max_rounds(&self) -> u32 {
        self.inner.config.max_conflict_retries + 1
    }

    fn conflict(&self, session_id: &str) -> Failure {
        Failure::new(
            FailureKind::ConcurrentModification,
            format!(
                "context of session {} kept changing after {} attempts",
                session_id,
                self.max_rounds()
            ),
        )
    }

    /// `ContextUpdated`: write `delta_for(fresh)` if the inputs behind `key`
    /// are still current.
    async fn commit<K, D>(
        &self,
        session_id: &str,
        key: &Fingerprint,
        key_for: K,
        delta_for: D,
    ) -> Result<Commit, Failure>
    where
        K: Fn(&ClientContext) -> Result<Fingerprint, Failure>,
        D: Fn(&ClientContext) -> Result<ContextDelta, Failure>,
    {
        let store = &self.inner.store;
        let fresh = store.get(session_id).await?;

        if key_for(&fresh)? != *key {
            debug!(session_id = %session_id, key = %key, "Inputs changed while computing");
            return Ok(Commit::Retry(fresh));
        }

        let delta = delta_for(&fresh)?;
        if delta.is_noop_for(&fresh) {
            return Ok(Commit::Committed);
        }

        match store.put(session_id, &delta, fresh.version).await {
            Ok(version) => {
                debug!(session_id = %session_id, version = version, "Context updated");
                Ok(Commit::Committed)
            }
            Err(Error::VersionConflict { expected, actual }) => {
                debug!(
                    session_id = %session_id,
                    expected = expected,
                    actual = actual,
                    "Context write lost a race, retrying"
                );
                Ok(Commit::Retry(store.get(session_id).await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_submit(&self, session_id: &str, info: BusinessInfo) -> Result<SubmitAck, Failure> {
        self.resolve_context(session_id, Operation::ProcessBusinessInfo)
            .await?;

        let value = serde_json::to_value(&info).map_err(Error::from)?;
        let delta = ContextDelta::new()
            .set(fields::BUSINESS_INFO, value.clone())
            .remove(fields::BUSINESS_INFO_PROCESSED)
            .remove(fields::CLIENT_CONTEXT)
            .remove(fields::PROCESSED_AT);

        for _ in 0..self.max_rounds() {
            let context = self.inner.store.get(session_id).await?;
            if context.get(fields::BUSINESS_INFO) == Some(&value) {
                debug!(session_id = %session_id, "Business info unchanged");
                return Ok(SubmitAck {
                    session_id: session_id.to_string(),
                    version: context.version,
                });
            }

            match self.inner.store.put(session_id, &delta, context.version).await {
                Ok(version) => {
                    if let Err(e) = self.invalidate_session_cache(session_id).await {
                        warn!(
                            session_id = %session_id,
                            error = %e,
                            "Failed to invalidate session cache"
                        );
                    }
                    info!(
                        session_id = %session_id,
                        company = %info.company_name,
                        products = info.products_services.len(),
                        version = version,
                        "Business info submitted"
                    );
                    return Ok(SubmitAck {
                        session_id: session_id.to_string(),
                        version,
                    });
                }
                Err(Error::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(self.conflict(session_id))
    }

    async fn run_process(&self, session_id: &str) -> Result<ClientContextSummary, Failure> {
        let mut context = self
            .resolve_context(session_id, Operation::ProcessBusinessInfo)
            .await?;

        for round in 1..=self.max_rounds() {
            let info = require_submitted(&context)?;
            let key = self.process_fingerprint(session_id, &info)?;
            let processed = self.processed_info(&key, &info).await?;

            let delta = ContextDelta::new()
                .set_serialized(fields::BUSINESS_INFO_PROCESSED, &processed)?
                .set(
                    fields::CLIENT_CONTEXT,
                    serde_json::Value::String(render_client_brief(&processed)),
                )
                .set_serialized(fields::PROCESSED_AT, &processed.processed_at)?;

            let outcome = self
                .commit(
                    session_id,
                    &key,
                    |fresh| self.process_fingerprint(session_id, &require_submitted(fresh)?),
                    |_| Ok(delta.clone()),
                )
                .await?;

            match outcome {
                Commit::Committed => {
                    let context = self.inner.store.get(session_id).await?;
                    info!(
                        session_id = %session_id,
                        products = processed.products_services.len(),
                        version = context.version,
                        "Business info processed"
                    );
                    return Ok(ClientContextSummary::from_context(&context)?);
                }
                Commit::Retry(fresh) => {
                    debug!(session_id = %session_id, round = round, "Retrying processing");
                    context = fresh;
                }
            }
        }

        Err(self.conflict(session_id))
    }

    async fn run_generate_keywords(
        &self,
        session_id: &str,
        kind: KeywordKind,
    ) -> Result<KeywordArtifact, Failure> {
        let mut context = self
            .resolve_context(session_id, Operation::GenerateKeywords { kind })
            .await?;

        for round in 1..=self.max_rounds() {
            let processed = require_processed(&context)?;
            let key = self.keyword_fingerprint(&processed, kind)?;
            let artifact = self.keyword_artifact(&key, &processed, kind).await?;

            let outcome = self
                .commit(
                    session_id,
                    &key,
                    |fresh| self.keyword_fingerprint(&require_processed(fresh)?, kind),
                    |fresh| {
                        let mut tables: Vec<String> = fresh
                            .get_as(fields::KEYWORD_TABLES)?
                            .unwrap_or_default();
                        if !tables.contains(&artifact.table_id) {
                            tables.push(artifact.table_id.clone());
                        }
                        let mut output: BTreeMap<String, KeywordArtifact> = fresh
                            .get_as(fields::KEYWORDS_OUTPUT)?
                            .unwrap_or_default();
                        output.insert(artifact.table_id.clone(), artifact.clone());
                        Ok(ContextDelta::new()
                            .set_serialized(fields::KEYWORD_TABLES, &tables)?
                            .set_serialized(fields::KEYWORDS_OUTPUT, &output)?)
                    },
                )
                .await?;

            match outcome {
                Commit::Committed => {
                    info!(
                        session_id = %session_id,
                        kind = %kind,
                        table_id = %artifact.table_id,
                        rows = artifact.rows.len(),
                        "Keywords ready"
                    );
                    return Ok(artifact);
                }
                Commit::Retry(fresh) => {
                    debug!(session_id = %session_id, round = round, "Retrying keyword generation");
                    context = fresh;
                }
            }
        }

        Err(self.conflict(session_id))
    }

    async fn run_get_context(&self, session_id: &str) -> Result<ClientContextSummary, Failure> {
        let context = self
            .resolve_context(session_id, Operation::GetClientContext)
            .await?;
        Ok(ClientContextSummary::from_context(&context)?)
    }

    /// `CacheChecked → Computing` for processed business info
    async fn processed_info(
        &self,
        key: &Fingerprint,
        info: &BusinessInfo,
    ) -> Result<ProcessedBusinessInfo, Failure> {
        if let Some(processed) = self.inner.cache.read_value(key.as_str()).await {
            debug!(key = %key, "Processed business info cache hit");
            return Ok(processed);
        }

        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        let info = info.clone();
        self.inner
            .processing
            .execute(key.as_str(), move |cancel| async move {
                let ttl = inner.config.keyword_ttl();
                lead(
                    &inner,
                    &flight_key,
                    ttl,
                    &cancel,
                    compute_processed(&inner, &info),
                )
                .await
            })
            .await
    }

    /// `CacheChecked → Computing` for a keyword table
    async fn keyword_artifact(
        &self,
        key: &Fingerprint,
        processed: &ProcessedBusinessInfo,
        kind: KeywordKind,
    ) -> Result<KeywordArtifact, Failure> {
        if let Some(artifact) = self.inner.cache.read_value(key.as_str()).await {
            debug!(key = %key, kind = %kind, "Keyword table cache hit");
            return Ok(artifact);
        }

        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        let processed = processed.clone();
        self.inner
            .keywords
            .execute(key.as_str(), move |cancel| async move {
                let ttl = inner.config.keyword_ttl();
                lead(
                    &inner,
                    &flight_key,
                    ttl,
                    &cancel,
                    compute_keywords(&inner, &processed, kind, &cancel),
                )
                .await
            })
            .await
    }
}

fn require_submitted(context: &ClientContext) -> Result<BusinessInfo, Failure> {
    context
        .get_as::<BusinessInfo>(fields::BUSINESS_INFO)?
        .ok_or_else(|| {
            Failure::missing_precondition(format!(
                "no business info has been submitted for session {}",
                context.session_id
            ))
        })
}

fn require_processed(context: &ClientContext) -> Result<ProcessedBusinessInfo, Failure> {
    let processed = context
        .get_as::<ProcessedBusinessInfo>(fields::BUSINESS_INFO_PROCESSED)?
        .ok_or_else(|| {
            Failure::missing_precondition(format!(
                "business info of session {} has not been processed",
                context.session_id
            ))
        })?;

    if !processed
        .products_services
        .iter()
        .any(|p| !p.product.name.trim().is_empty())
    {
        return Err(Failure::missing_precondition(format!(
            "session {} lists no products or services",
            context.session_id
        )));
    }
    Ok(processed)
}

/// Become the process-group leader for `key`, or pick up the result of the
/// process that is.
async fn claim<T: DeserializeOwned>(
    inner: &Inner,
    key: &Fingerprint,
    cancel: &CancellationToken,
) -> Result<Claim<T>, Failure> {
    let remote = inner.cache.remote();
    let give_up_at = Instant::now() + inner.lease_ttl * 2;

    loop {
        if let Some(value) = inner.cache.read_value(key.as_str()).await {
            return Ok(Claim::Cached(value));
        }

        match remote
            .acquire_lease(key.as_str(), &inner.owner, inner.lease_ttl)
            .await
        {
            Ok(true) => return Ok(Claim::Leased),
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Lease unavailable, computing without it");
                return Ok(Claim::Unleased);
            }
        }

        if Instant::now() >= give_up_at {
            warn!(key = %key, "Lease holder never finished, computing without lease");
            return Ok(Claim::Unleased);
        }

        debug!(key = %key, "Another process is computing, waiting");
        tokio::select! {
            _ = tokio::time::sleep(inner.lease_poll) => {}
            _ = cancel.cancelled() => {
                return Err(Failure::canceled(format!("canceled while waiting for {}", key)));
            }
        }
    }
}

/// Leader path: claim the key, compute, then cache the artifact.
/// A cache-write failure is logged and the artifact still returned.
async fn lead<T, Fut>(
    inner: &Inner,
    key: &Fingerprint,
    ttl: Duration,
    cancel: &CancellationToken,
    compute: Fut,
) -> Result<T, Failure>
where
    T: Serialize + DeserializeOwned,
    Fut: Future<Output = Result<T, Failure>>,
{
    let leased = match claim::<T>(inner, key, cancel).await? {
        Claim::Cached(value) => {
            debug!(key = %key, "Artifact produced by another process");
            return Ok(value);
        }
        Claim::Leased => true,
        Claim::Unleased => false,
    };

    let result = compute.await;

    if let Ok(value) = &result {
        if let Err(e) = inner.cache.write_value(key.as_str(), value, Some(ttl)).await {
            warn!(key = %key, error = %e, "Cache write failed, returning uncached result");
        }
    }

    if leased {
        if let Err(e) = inner.cache.remote().release_lease(key.as_str(), &inner.owner).await {
            warn!(key = %key, error = %e, "Failed to release lease, it will expire");
        }
    }

    result
}

async fn compute_processed(
    inner: &Arc<Inner>,
    info: &BusinessInfo,
) -> Result<ProcessedBusinessInfo, Failure> {
    let products = try_join_all(info.products_services.iter().map(|product| async move {
        let url_summary = match product.page_url() {
            Some(url) => url_summary(inner, url).await?,
            None => String::new(),
        };
        Ok::<_, Failure>(ProcessedProduct {
            product: product.clone(),
            url_summary,
        })
    }))
    .await?;

    Ok(ProcessedBusinessInfo::new(info, products))
}

/// Page summary, cached globally by URL
async fn url_summary(inner: &Arc<Inner>, url: &str) -> Result<String, Failure> {
    let key = Fingerprint::builder(OP_URL_SUMMARY)
        .input("url", url)?
        .build();

    if let Some(summary) = inner.cache.read_value(key.as_str()).await {
        debug!(url = %url, "Page summary cache hit");
        return Ok(summary);
    }

    let flight = Arc::clone(inner);
    let flight_key = key.clone();
    let url = url.to_string();
    inner
        .summaries
        .execute(key.as_str(), move |cancel| async move {
            let ttl = flight.config.summary_ttl();
            lead(
                &flight,
                &flight_key,
                ttl,
                &cancel,
                compute_summary(&flight, &url, &cancel),
            )
            .await
        })
        .await
}

async fn compute_summary(
    inner: &Inner,
    url: &str,
    cancel: &CancellationToken,
) -> Result<String, Failure> {
    let payload = serde_json::json!({ "url": url });
    inner
        .invoker
        .invoke(OP_URL_SUMMARY, &payload, cancel, || {
            inner.research.summarize_url(url)
        })
        .await
}

async fn compute_keywords(
    inner: &Inner,
    processed: &ProcessedBusinessInfo,
    kind: KeywordKind,
    cancel: &CancellationToken,
) -> Result<KeywordArtifact, Failure> {
    let limit = inner.config.max_keywords_per_product;
    let mut rows = Vec::new();

    for item in &processed.products_services {
        let product = &item.product;
        if product.name.trim().is_empty() {
            debug!("Skipping product without a name");
            continue;
        }

        let request = KeywordRequest {
            product_name: product.name.clone(),
            description: product.description.clone(),
            target_persona: product.target_persona.clone(),
            url_summary: item.url_summary.clone(),
            market_geo: processed.market_geo.clone(),
            kind,
        };
        let payload = serde_json::to_value(&request).unwrap_or_default();

        let mut product_rows = inner
            .invoker
            .invoke(OP_KEYWORDS, &payload, cancel, || {
                inner.research.generate_keywords(&request)
            })
            .await?;

        if product_rows.len() > limit {
            debug!(
                product = %product.name,
                total = product_rows.len(),
                limit = limit,
                "Truncating keyword list"
            );
            product_rows.truncate(limit);
        }
        rows.extend(product_rows);
    }

    info!(kind = %kind, rows = rows.len(), "Keyword table generated");
    Ok(KeywordArtifact::new(kind, rows))
}

#[cfg(test)]
mod tests;
