use super::*;
use crate::cache::{CacheEntry, DistributedTier, MemoryTier};
use crate::context::MemoryContextStore;
use crate::invoker::{InvokePolicy, UpstreamError};
use crate::research::{FixtureBackend, KeywordRow, Priority, Product};
use crate::utils::{CircuitBreakerConfig, RetryPolicy};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fixture backend that counts calls and can be slowed down or broken
#[derive(Default)]
struct CountingBackend {
    fixture: FixtureBackend,
    summaries: AtomicU32,
    keyword_calls: AtomicU32,
    delay: Duration,
    keyword_error: Option<UpstreamError>,
}

impl CountingBackend {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(error: UpstreamError) -> Self {
        Self {
            keyword_error: Some(error),
            ..Self::default()
        }
    }

    fn keyword_calls(&self) -> u32 {
        self.keyword_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn summarize_url(&self, url: &str) -> std::result::Result<String, UpstreamError> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        self.fixture.summarize_url(url).await
    }

    async fn generate_keywords(
        &self,
        request: &KeywordRequest,
    ) -> std::result::Result<Vec<KeywordRow>, UpstreamError> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.keyword_error {
            return Err(error.clone());
        }
        self.fixture.generate_keywords(request).await
    }
}

/// Store that lets another writer win the next `conflicts` writes
struct ConflictingStore {
    inner: MemoryContextStore,
    conflicts: AtomicU32,
}

impl ConflictingStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryContextStore::new(),
            conflicts: AtomicU32::new(conflicts),
        }
    }
}

#[async_trait]
impl ContextStore for ConflictingStore {
    async fn get(&self, session_id: &str) -> crate::error::Result<ClientContext> {
        self.inner.get(session_id).await
    }

    async fn put(
        &self,
        session_id: &str,
        delta: &ContextDelta,
        expected_version: u64,
    ) -> crate::error::Result<u64> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            let other = ContextDelta::new().set("note", json!(remaining));
            self.inner.put(session_id, &other, expected_version).await?;
        }
        self.inner.put(session_id, delta, expected_version).await
    }

    async fn create_if_absent(&self, session_id: &str) -> crate::error::Result<ClientContext> {
        self.inner.create_if_absent(session_id).await
    }

    async fn touch(&self, session_id: &str) -> crate::error::Result<()> {
        self.inner.touch(session_id).await
    }

    async fn delete(&self, session_id: &str) -> crate::error::Result<bool> {
        self.inner.delete(session_id).await
    }

    async fn expire_idle(&self, idle_ttl: Duration) -> crate::error::Result<Vec<String>> {
        self.inner.expire_idle(idle_ttl).await
    }

    async fn count(&self) -> crate::error::Result<usize> {
        self.inner.count().await
    }
}

/// Memory tier that refuses every write
#[derive(Default)]
struct ReadOnlyTier(MemoryTier);

#[async_trait]
impl DistributedTier for ReadOnlyTier {
    async fn get(&self, key: &str) -> crate::error::Result<Option<CacheEntry>> {
        self.0.get(key).await
    }

    async fn set(&self, _entry: &CacheEntry) -> crate::error::Result<()> {
        Err(Error::Cache("OOM command not allowed".to_string()))
    }

    async fn delete(&self, key: &str) -> crate::error::Result<bool> {
        self.0.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> crate::error::Result<usize> {
        self.0.delete_prefix(prefix).await
    }

    async fn acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> crate::error::Result<bool> {
        self.0.acquire_lease(key, owner, ttl).await
    }

    async fn release_lease(&self, key: &str, owner: &str) -> crate::error::Result<bool> {
        self.0.release_lease(key, owner).await
    }

    async fn lease_held(&self, key: &str) -> crate::error::Result<bool> {
        self.0.lease_held(key).await
    }
}

fn priority(value: serde_json::Value) -> Priority {
    serde_json::from_value(value).unwrap()
}

fn business_info() -> BusinessInfo {
    BusinessInfo {
        company_name: "Logitech".to_string(),
        location: "Lausanne".to_string(),
        market_geo: "United States".to_string(),
        niche: "computer peripherals".to_string(),
        products_services: vec![
            Product {
                name: "G402".to_string(),
                description: "gaming mouse".to_string(),
                priority: priority(json!(3)),
                target_persona: "gamers".to_string(),
                url: Some("https://example.com/g402".to_string()),
            },
            Product {
                name: "MX Keys".to_string(),
                description: "wireless keyboard".to_string(),
                priority: priority(json!(9)),
                target_persona: "office workers".to_string(),
                url: None,
            },
        ],
        ..BusinessInfo::default()
    }
}

fn invoker() -> Arc<ResilientInvoker> {
    let policy = InvokePolicy::default()
        .with_retry(
            RetryPolicy::new()
                .with_max_attempts(2)
                .with_base_backoff(Duration::from_millis(1))
                .with_jitter(false),
        )
        .with_timeout(Duration::from_secs(2));
    Arc::new(ResilientInvoker::new(
        policy,
        CircuitBreakerConfig::new().with_min_requests(100),
    ))
}

fn build(
    backend: Arc<CountingBackend>,
    store: Arc<dyn ContextStore>,
    tier: Arc<MemoryTier>,
) -> SessionOrchestrator {
    SessionOrchestrator::builder(store, Arc::new(TwoTierCache::new(tier)), invoker(), backend)
        .lease(Duration::from_secs(5), Duration::from_millis(10))
        .build()
}

fn orchestrator(backend: Arc<CountingBackend>) -> SessionOrchestrator {
    build(
        backend,
        Arc::new(MemoryContextStore::new()),
        Arc::new(MemoryTier::new()),
    )
}

async fn processed_session(orchestrator: &SessionOrchestrator) -> String {
    let session = orchestrator.start_session().await.unwrap();
    orchestrator
        .submit_business_info(&session, business_info())
        .await
        .unwrap();
    orchestrator.process_business_info(&session).await.unwrap();
    session
}

#[tokio::test]
async fn test_generate_before_processing_is_missing_precondition() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));

    let failure = orchestrator
        .generate_keywords("fresh-session", KeywordKind::BoFu)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::MissingPrecondition);
    // The session was created lazily
    assert!(orchestrator.store().get("fresh-session").await.is_ok());
}

#[tokio::test]
async fn test_process_before_submit_is_missing_precondition() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));
    let session = orchestrator.start_session().await.unwrap();

    let failure = orchestrator.process_business_info(&session).await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::MissingPrecondition);
}

#[tokio::test]
async fn test_get_unknown_session_is_not_found() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));

    let failure = orchestrator.get_client_context("nope").await.unwrap_err();
    assert_eq!(failure.kind, FailureKind::NotFound);
}

#[tokio::test]
async fn test_process_orders_products_and_renders_brief() {
    let backend = Arc::new(CountingBackend::default());
    let orchestrator = orchestrator(backend.clone());
    let session = orchestrator.start_session().await.unwrap();

    let ack = orchestrator
        .submit_business_info(&session, business_info())
        .await
        .unwrap();
    assert_eq!(ack.version, 1);

    let summary = orchestrator.process_business_info(&session).await.unwrap();

    assert!(summary.processed);
    assert_eq!(summary.company_name.as_deref(), Some("Logitech"));
    let names: Vec<&str> = summary.products.iter().map(|p| p.product.name.as_str()).collect();
    assert_eq!(names, vec!["MX Keys", "G402"]);
    assert!(summary.products[1].url_summary.contains("https://example.com/g402"));
    assert!(summary.client_context.unwrap().contains("Logitech"));
    // Only the product with a URL was summarized
    assert_eq!(backend.summaries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generate_records_table_and_hits_cache_afterwards() {
    let backend = Arc::new(CountingBackend::default());
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;

    let first = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap();
    assert!(!first.rows.is_empty());
    assert_eq!(backend.keyword_calls(), 2);

    let second = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.keyword_calls(), 2);

    let summary = orchestrator.get_client_context(&session).await.unwrap();
    assert_eq!(summary.keyword_tables, vec![first.table_id.clone()]);
}

#[tokio::test]
async fn test_keyword_tables_outlive_cached_artifacts() {
    let backend = Arc::new(CountingBackend::default());
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;

    let generated = orchestrator
        .generate_keywords(&session, KeywordKind::ToFu)
        .await
        .unwrap();
    orchestrator
        .cache()
        .invalidate_scope(&Scope::Global)
        .await
        .unwrap();

    let stored = orchestrator
        .keyword_table(&session, &generated.table_id)
        .await
        .unwrap();
    assert_eq!(stored, generated);

    let failure = orchestrator
        .keyword_table(&session, "bofu_keywords_19700101_000000")
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::NotFound);
}

#[tokio::test]
async fn test_cache_write_failures_do_not_fail_requests() {
    let backend = Arc::new(CountingBackend::default());
    let cache = Arc::new(TwoTierCache::new(Arc::new(ReadOnlyTier::default())));
    let orchestrator = SessionOrchestrator::builder(
        Arc::new(MemoryContextStore::new()),
        cache,
        invoker(),
        backend.clone(),
    )
    .lease(Duration::from_secs(5), Duration::from_millis(10))
    .build();

    let session = orchestrator.start_session().await.unwrap();
    orchestrator
        .submit_business_info(&session, business_info())
        .await
        .unwrap();
    let summary = orchestrator.process_business_info(&session).await.unwrap();
    assert!(summary.processed);

    let first = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap();
    assert!(!first.rows.is_empty());
    assert_eq!(backend.keyword_calls(), 2);

    // Nothing was cached, so the next request computes again
    orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap();
    assert_eq!(backend.keyword_calls(), 4);

    let summary = orchestrator.get_client_context(&session).await.unwrap();
    assert!(summary.keyword_tables.contains(&first.table_id));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_computation() {
    let backend = Arc::new(CountingBackend::slow(Duration::from_millis(50)));
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = orchestrator.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .generate_keywords(&session, KeywordKind::MoFu)
                .await
        }));
    }

    let mut table_ids = Vec::new();
    for handle in handles {
        table_ids.push(handle.await.unwrap().unwrap().table_id);
    }

    table_ids.dedup();
    assert_eq!(table_ids.len(), 1);
    // One upstream call per product, not per request
    assert_eq!(backend.keyword_calls(), 2);

    let summary = orchestrator.get_client_context(&session).await.unwrap();
    assert_eq!(summary.keyword_tables.len(), 1);
}

#[tokio::test]
async fn test_identical_sessions_share_global_keyword_tables() {
    let backend = Arc::new(CountingBackend::default());
    let orchestrator = orchestrator(backend.clone());

    let a = processed_session(&orchestrator).await;
    let b = processed_session(&orchestrator).await;

    let from_a = orchestrator.generate_keywords(&a, KeywordKind::ToFu).await.unwrap();
    let from_b = orchestrator.generate_keywords(&b, KeywordKind::ToFu).await.unwrap();

    assert_eq!(from_a.table_id, from_b.table_id);
    assert_eq!(backend.keyword_calls(), 2);
}

#[tokio::test]
async fn test_processes_sharing_a_tier_compute_once() {
    let backend = Arc::new(CountingBackend::slow(Duration::from_millis(50)));
    let store: Arc<dyn ContextStore> = Arc::new(MemoryContextStore::new());
    let tier = Arc::new(MemoryTier::new());
    let first = build(backend.clone(), store.clone(), tier.clone());
    let second = build(backend.clone(), store, tier);

    let session = processed_session(&first).await;

    let (a, b) = tokio::join!(
        first.generate_keywords(&session, KeywordKind::BoFu),
        second.generate_keywords(&session, KeywordKind::BoFu),
    );

    assert_eq!(a.unwrap().table_id, b.unwrap().table_id);
    assert_eq!(backend.keyword_calls(), 2);
}

#[tokio::test]
async fn test_exhausted_upstream_leaves_context_unchanged() {
    let backend = Arc::new(CountingBackend::failing(UpstreamError::Unavailable {
        status: 503,
    }));
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;
    let before = orchestrator.store().get(&session).await.unwrap();

    let failure = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Exhausted);
    // Two attempts on the first product, then the whole operation fails
    assert_eq!(backend.keyword_calls(), 2);
    let after = orchestrator.store().get(&session).await.unwrap();
    assert_eq!(before.version, after.version);
    assert!(!after.has(fields::KEYWORD_TABLES));

    let processed = require_processed(&after).unwrap();
    let key = orchestrator
        .keyword_fingerprint(&processed, KeywordKind::BoFu)
        .unwrap();
    assert!(orchestrator
        .cache()
        .read_value::<KeywordArtifact>(key.as_str())
        .await
        .is_none());
}

#[tokio::test]
async fn test_rejected_upstream_is_not_retried() {
    let backend = Arc::new(CountingBackend::failing(UpstreamError::Rejected { status: 400 }));
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;

    let failure = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Rejected);
    assert_eq!(backend.keyword_calls(), 1);
}

#[tokio::test]
async fn test_resubmission_clears_processed_state_and_session_cache() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));
    let session = processed_session(&orchestrator).await;
    let old_key = orchestrator
        .process_fingerprint(&session, &business_info())
        .unwrap();
    assert!(orchestrator
        .cache()
        .read_value::<ProcessedBusinessInfo>(old_key.as_str())
        .await
        .is_some());

    let mut changed = business_info();
    changed.company_name = "Logi".to_string();
    orchestrator
        .submit_business_info(&session, changed)
        .await
        .unwrap();

    let summary = orchestrator.get_client_context(&session).await.unwrap();
    assert!(!summary.processed);
    assert!(summary.client_context.is_none());
    assert!(orchestrator
        .cache()
        .read_value::<ProcessedBusinessInfo>(old_key.as_str())
        .await
        .is_none());

    let summary = orchestrator.process_business_info(&session).await.unwrap();
    assert_eq!(summary.company_name.as_deref(), Some("Logi"));
}

#[tokio::test]
async fn test_unchanged_resubmission_keeps_version() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));
    let session = processed_session(&orchestrator).await;
    let version = orchestrator.store().get(&session).await.unwrap().version;

    let ack = orchestrator
        .submit_business_info(&session, business_info())
        .await
        .unwrap();

    assert_eq!(ack.version, version);
    assert!(orchestrator.get_client_context(&session).await.unwrap().processed);
}

#[tokio::test]
async fn test_deadline_cancels_caller_but_not_shared_work() {
    let backend = Arc::new(CountingBackend::slow(Duration::from_millis(100)));
    let orchestrator = orchestrator(backend.clone());
    let session = processed_session(&orchestrator).await;

    let failure = orchestrator
        .execute(
            &session,
            Operation::GenerateKeywords {
                kind: KeywordKind::BoFu,
            },
            Some(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Canceled);

    let output = orchestrator
        .execute(
            &session,
            Operation::GenerateKeywords {
                kind: KeywordKind::BoFu,
            },
            None,
        )
        .await
        .unwrap();

    assert!(matches!(output, OperationOutput::Keywords(ref artifact) if !artifact.rows.is_empty()));
    assert_eq!(backend.keyword_calls(), 2);
}

#[tokio::test]
async fn test_version_conflict_retries_without_recomputing() {
    let backend = Arc::new(CountingBackend::default());
    let store = Arc::new(ConflictingStore::new(0));
    let orchestrator = build(backend.clone(), store.clone(), Arc::new(MemoryTier::new()));
    let session = processed_session(&orchestrator).await;

    store.conflicts.store(1, Ordering::SeqCst);
    let artifact = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap();

    assert_eq!(backend.keyword_calls(), 2);
    let context = orchestrator.store().get(&session).await.unwrap();
    assert!(context.has("note"));
    let tables: Vec<String> = context.get_as(fields::KEYWORD_TABLES).unwrap().unwrap();
    assert_eq!(tables, vec![artifact.table_id]);
}

#[tokio::test]
async fn test_persistent_conflicts_give_up() {
    let store = Arc::new(ConflictingStore::new(0));
    let orchestrator = build(
        Arc::new(CountingBackend::default()),
        store.clone(),
        Arc::new(MemoryTier::new()),
    );
    let session = processed_session(&orchestrator).await;

    store.conflicts.store(100, Ordering::SeqCst);
    let failure = orchestrator
        .generate_keywords(&session, KeywordKind::BoFu)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::ConcurrentModification);
}

#[tokio::test]
async fn test_get_client_context_through_execute() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));
    let session = processed_session(&orchestrator).await;

    let output = orchestrator
        .execute(&session, Operation::GetClientContext, None)
        .await
        .unwrap();

    match output {
        OperationOutput::Context(summary) => {
            assert_eq!(summary.session_id, session);
            assert!(summary.processed);
        }
        other => panic!("unexpected output: {:?}", other),
    }
}

#[test]
fn test_keyword_fingerprint_ignores_text_noise() {
    let orchestrator = orchestrator(Arc::new(CountingBackend::default()));
    let product = |name: &str| ProcessedProduct {
        product: Product {
            name: name.to_string(),
            description: "gaming mouse".to_string(),
            ..Product::default()
        },
        url_summary: String::new(),
    };

    let mut info = business_info();
    info.products_services.clear();
    let clean = ProcessedBusinessInfo::new(&info, vec![product("G402")]);
    let noisy = ProcessedBusinessInfo::new(&info, vec![product("  g402 ")]);

    let a = orchestrator.keyword_fingerprint(&clean, KeywordKind::BoFu).unwrap();
    let b = orchestrator.keyword_fingerprint(&noisy, KeywordKind::BoFu).unwrap();
    let c = orchestrator.keyword_fingerprint(&clean, KeywordKind::ToFu).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.scope(), &Scope::Global);
}
