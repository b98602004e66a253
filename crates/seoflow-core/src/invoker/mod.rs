//! Resilient Invoker
//!
//! Wraps slow or unreliable upstream operations with a per-attempt timeout,
//! retry with exponential backoff and a circuit breaker per operation.
//! Every attempt is logged and published as an [`UpstreamCall`].

mod types;

pub use types::{CallOutcome, UpstreamCall, UpstreamError};

use crate::error::{Failure, FailureKind};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the attempt broadcast channel
const CALL_CHANNEL_CAPACITY: usize = 256;

/// Decides whether an upstream error is transient
pub type RetryPredicate = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// How one operation is invoked
#[derive(Clone)]
pub struct InvokePolicy {
    /// Attempt budget and backoff schedule
    pub retry: RetryPolicy,
    /// Timeout applied to every attempt
    pub timeout_per_attempt: Duration,
    /// Transient-error classification
    pub retryable: RetryPredicate,
}

impl Default for InvokePolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout_per_attempt: Duration::from_secs(30),
            retryable: Arc::new(UpstreamError::is_retryable),
        }
    }
}

impl std::fmt::Debug for InvokePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokePolicy")
            .field("retry", &self.retry)
            .field("timeout_per_attempt", &self.timeout_per_attempt)
            .finish_non_exhaustive()
    }
}

impl InvokePolicy {
    /// Set the retry schedule
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_attempt = timeout;
        self
    }

    /// Replace the transient-error predicate
    #[must_use]
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }
}

/// Resilient Invoker
pub struct ResilientInvoker {
    policy: InvokePolicy,
    breaker_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    calls: broadcast::Sender<UpstreamCall>,
}

impl ResilientInvoker {
    /// Create an invoker with a default policy and breaker configuration
    #[must_use]
    pub fn new(policy: InvokePolicy, breaker_config: CircuitBreakerConfig) -> Self {
        let (calls, _) = broadcast::channel(CALL_CHANNEL_CAPACITY);
        Self {
            policy,
            breaker_config,
            breakers: DashMap::new(),
            calls,
        }
    }

    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &InvokerConfig) -> Self {
        Self::new(config.policy(), config.circuit_breaker.breaker_config())
    }

    /// Default policy
    #[must_use]
    pub fn policy(&self) -> &InvokePolicy {
        &self.policy
    }

    /// Receive every attempt made from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UpstreamCall> {
        self.calls.subscribe()
    }

    /// Breaker state of `operation`, if it has been invoked
    #[must_use]
    pub fn circuit_state(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|b| b.state())
    }

    fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(operation, self.breaker_config.clone()))
            })
            .clone()
    }

    /// Invoke with the default policy
    pub async fn invoke<T, F, Fut>(
        &self,
        operation: &str,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let policy = self.policy.clone();
        self.invoke_with(operation, payload, &policy, cancel, call).await
    }

    /// Invoke `call` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    ///
    /// Cancellation is observed between attempts and during backoff; an
    /// attempt already running finishes or times out first.
    pub async fn invoke_with<T, F, Fut>(
        &self,
        operation: &str,
        payload: &serde_json::Value,
        policy: &InvokePolicy,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let breaker = self.breaker(operation);
        let max_attempts = policy.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(Failure::canceled(format!(
                    "{} canceled before attempt {}",
                    operation, attempt
                )));
            }

            if !breaker.can_execute() {
                warn!(operation = %operation, "Circuit open, failing fast");
                return Err(Failure::new(
                    FailureKind::CircuitOpen,
                    format!("circuit open for {}", operation),
                ));
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(policy.timeout_per_attempt, call()).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout),
            };
            let elapsed = started.elapsed();

            let error = match result {
                Ok(value) => {
                    breaker.record_success();
                    self.emit(operation, payload, attempt, elapsed, CallOutcome::Success);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let retryable = (policy.retryable)(&error);
            let outcome = match (&error, retryable) {
                (UpstreamError::Timeout, _) => CallOutcome::Timeout,
                (_, true) => CallOutcome::RetryableError,
                (_, false) => CallOutcome::Error,
            };
            self.emit(operation, payload, attempt, elapsed, outcome);

            if !retryable {
                // The upstream answered, so the call counts as healthy
                breaker.record_success();
                return Err(Failure::new(
                    FailureKind::Rejected,
                    format!("{}: {}", operation, error),
                ));
            }
            breaker.record_failure();

            if attempt >= max_attempts {
                warn!(
                    operation = %operation,
                    attempts = attempt,
                    error = %error,
                    "Upstream retries exhausted"
                );
                return Err(Failure::new(
                    FailureKind::Exhausted,
                    format!("{} failed after {} attempts: {}", operation, attempt, error),
                ));
            }

            let delay = policy.retry.delay_after(attempt);
            warn!(
                operation = %operation,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Upstream call failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(Failure::canceled(format!(
                        "{} canceled during backoff after attempt {}",
                        operation, attempt
                    )));
                }
            }
        }
    }

    fn emit(
        &self,
        operation: &str,
        payload: &serde_json::Value,
        attempt: u32,
        elapsed: Duration,
        outcome: CallOutcome,
    ) {
        debug!(
            operation = %operation,
            attempt = attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            outcome = %outcome,
            "Upstream call"
        );
        // No subscribers is fine
        let _ = self.calls.send(UpstreamCall {
            operation: operation.to_string(),
            payload: payload.clone(),
            attempt,
            elapsed,
            outcome,
        });
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_timeout_per_attempt_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

fn default_failure_ratio() -> f64 {
    0.5
}

fn default_min_requests() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    1
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failure ratio that opens the circuit
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    /// Sample size required before tripping
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
    /// Rolling window
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Open duration before probing
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Half-open successes needed to close
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_ratio: default_failure_ratio(),
            min_requests: default_min_requests(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Breaker configuration
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_ratio(self.failure_ratio)
            .with_min_requests(self.min_requests)
            .with_failure_window(Duration::from_secs(self.window_secs))
            .with_cooldown(Duration::from_secs(self.cooldown_secs))
            .with_success_threshold(self.success_threshold)
    }
}

/// Invoker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Attempts per call, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Backoff cap before jitter
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_per_attempt_ms")]
    pub timeout_per_attempt_ms: u64,
    /// Randomize delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_per_attempt_ms: default_timeout_per_attempt_ms(),
            jitter: default_jitter(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl InvokerConfig {
    /// Invoke policy with the default retry predicate
    #[must_use]
    pub fn policy(&self) -> InvokePolicy {
        InvokePolicy::default()
            .with_retry(
                RetryPolicy::new()
                    .with_max_attempts(self.max_attempts)
                    .with_base_backoff(Duration::from_millis(self.base_backoff_ms))
                    .with_backoff_multiplier(self.backoff_multiplier)
                    .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
                    .with_jitter(self.jitter),
            )
            .with_timeout(Duration::from_millis(self.timeout_per_attempt_ms))
    }
}

#[cfg(test)]
mod tests;
