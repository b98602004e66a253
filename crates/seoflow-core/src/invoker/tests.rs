use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast_policy(max_attempts: u32) -> InvokePolicy {
    InvokePolicy::default()
        .with_retry(
            RetryPolicy::new()
                .with_max_attempts(max_attempts)
                .with_base_backoff(Duration::from_millis(1))
                .with_jitter(false),
        )
        .with_timeout(Duration::from_millis(200))
}

fn lenient_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig::new().with_min_requests(100)
}

/// Fails with `error` for the first `failures` calls, then returns `attempt`
async fn flaky(
    counter: Arc<AtomicU32>,
    failures: u32,
    error: UpstreamError,
) -> Result<u32, UpstreamError> {
    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= failures {
        Err(error)
    } else {
        Ok(n)
    }
}

#[tokio::test]
async fn test_k_transient_failures_then_success() {
    let invoker = ResilientInvoker::new(fast_policy(4), lenient_breaker());
    let mut calls = invoker.subscribe();
    let counter = Arc::new(AtomicU32::new(0));

    let result = invoker
        .invoke_with(
            "keywords.generate",
            &json!({"kind": "bofu"}),
            &fast_policy(4),
            &CancellationToken::new(),
            || flaky(counter.clone(), 2, UpstreamError::Unavailable { status: 503 }),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    let mut outcomes = Vec::new();
    while let Ok(call) = calls.try_recv() {
        assert_eq!(call.operation, "keywords.generate");
        outcomes.push((call.attempt, call.outcome));
    }
    assert_eq!(
        outcomes,
        vec![
            (1, CallOutcome::RetryableError),
            (2, CallOutcome::RetryableError),
            (3, CallOutcome::Success),
        ]
    );
}

#[tokio::test]
async fn test_exhausted_when_attempts_run_out() {
    let invoker = ResilientInvoker::new(fast_policy(3), lenient_breaker());
    let counter = Arc::new(AtomicU32::new(0));

    let result = invoker
        .invoke("scrape.url_summary", &json!({}), &CancellationToken::new(), || {
            flaky(counter.clone(), 3, UpstreamError::ConnectionReset("peer".to_string()))
        })
        .await;

    let failure = result.unwrap_err();
    assert_eq!(failure.kind, FailureKind::Exhausted);
    assert!(failure.message.contains("3 attempts"));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_non_retryable_error_fails_immediately() {
    let invoker = ResilientInvoker::new(fast_policy(5), lenient_breaker());
    let counter = Arc::new(AtomicU32::new(0));

    let result = invoker
        .invoke("keywords.generate", &json!({}), &CancellationToken::new(), || {
            flaky(counter.clone(), 10, UpstreamError::Rejected { status: 400 })
        })
        .await;

    assert_eq!(result.unwrap_err().kind, FailureKind::Rejected);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_predicate_overrides_classification() {
    let invoker = ResilientInvoker::new(fast_policy(3), lenient_breaker());
    let counter = Arc::new(AtomicU32::new(0));
    let policy = fast_policy(3).with_retryable(|_| true);

    let result = invoker
        .invoke_with("op", &json!({}), &policy, &CancellationToken::new(), || {
            flaky(counter.clone(), 1, UpstreamError::Rejected { status: 409 })
        })
        .await;

    assert_eq!(result.unwrap(), 2);
}

#[tokio::test]
async fn test_attempt_timeout_is_retried() {
    let invoker = ResilientInvoker::new(fast_policy(2), lenient_breaker());
    let policy = fast_policy(2).with_timeout(Duration::from_millis(20));
    let counter = Arc::new(AtomicU32::new(0));
    let mut calls = invoker.subscribe();

    let result = invoker
        .invoke_with("op", &json!({}), &policy, &CancellationToken::new(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, UpstreamError>("done")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.try_recv().unwrap().outcome, CallOutcome::Timeout);
    assert_eq!(calls.try_recv().unwrap().outcome, CallOutcome::Success);
}

#[tokio::test]
async fn test_open_circuit_makes_no_attempt() {
    let breaker = CircuitBreakerConfig::new()
        .with_min_requests(2)
        .with_failure_ratio(0.5)
        .with_cooldown(Duration::from_secs(60));
    let invoker = ResilientInvoker::new(fast_policy(1), breaker);
    let counter = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
        let failure = invoker
            .invoke("op", &json!({}), &CancellationToken::new(), || {
                flaky(counter.clone(), 100, UpstreamError::Timeout)
            })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exhausted);
    }
    assert_eq!(invoker.circuit_state("op"), Some(CircuitState::Open));

    let failure = invoker
        .invoke("op", &json!({}), &CancellationToken::new(), || {
            flaky(counter.clone(), 0, UpstreamError::Timeout)
        })
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::CircuitOpen);
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    // Other operations keep their own breaker
    let other = invoker
        .invoke("other", &json!({}), &CancellationToken::new(), || async {
            Ok::<_, UpstreamError>(1)
        })
        .await;
    assert_eq!(other.unwrap(), 1);
}

#[tokio::test]
async fn test_circuit_probes_after_cooldown() {
    let breaker = CircuitBreakerConfig::new()
        .with_min_requests(1)
        .with_cooldown(Duration::from_millis(30));
    let invoker = ResilientInvoker::new(fast_policy(1), breaker);

    let _ = invoker
        .invoke("op", &json!({}), &CancellationToken::new(), || async {
            Err::<u32, _>(UpstreamError::Unavailable { status: 502 })
        })
        .await;
    assert_eq!(invoker.circuit_state("op"), Some(CircuitState::Open));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = invoker
        .invoke("op", &json!({}), &CancellationToken::new(), || async {
            Ok::<_, UpstreamError>(7)
        })
        .await;
    assert_eq!(result.unwrap(), 7);
    assert_eq!(invoker.circuit_state("op"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_rejected_half_open_call_closes_circuit() {
    let breaker = CircuitBreakerConfig::new()
        .with_min_requests(1)
        .with_cooldown(Duration::from_millis(30));
    let invoker = ResilientInvoker::new(fast_policy(1), breaker);

    let _ = invoker
        .invoke("op", &json!({}), &CancellationToken::new(), || async {
            Err::<u32, _>(UpstreamError::Unavailable { status: 503 })
        })
        .await;
    assert_eq!(invoker.circuit_state("op"), Some(CircuitState::Open));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let failure = invoker
        .invoke("op", &json!({}), &CancellationToken::new(), || async {
            Err::<u32, _>(UpstreamError::Rejected { status: 400 })
        })
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Rejected);
    assert_eq!(invoker.circuit_state("op"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_cancellation_stops_between_attempts() {
    let policy = fast_policy(10).with_retry(
        RetryPolicy::new()
            .with_max_attempts(10)
            .with_base_backoff(Duration::from_secs(5))
            .with_jitter(false),
    );
    let invoker = ResilientInvoker::new(policy.clone(), lenient_breaker());
    let cancel = CancellationToken::new();
    let counter = Arc::new(AtomicU32::new(0));

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let failure = invoker
        .invoke_with("op", &json!({}), &policy, &cancel, || {
            flaky(counter.clone(), 100, UpstreamError::Timeout)
        })
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Canceled);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_status_classification() {
    assert!(UpstreamError::from_status(503).is_retryable());
    assert!(UpstreamError::from_status(429).is_retryable());
    assert!(!UpstreamError::from_status(404).is_retryable());
    assert!(!UpstreamError::Invalid("bad json".to_string()).is_retryable());
}

#[test]
fn test_config_builds_policy() {
    let config = InvokerConfig {
        max_attempts: 5,
        base_backoff_ms: 10,
        jitter: false,
        ..InvokerConfig::default()
    };
    let policy = config.policy();
    assert_eq!(policy.retry.max_attempts, 5);
    assert_eq!(policy.retry.base_backoff, Duration::from_millis(10));
    assert_eq!(policy.timeout_per_attempt, Duration::from_secs(30));
}
