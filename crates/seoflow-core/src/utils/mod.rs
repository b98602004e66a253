//! Utility modules for seoflow-core
//!
//! - retry: backoff schedule for upstream retries
//! - circuit_breaker: rolling failure-ratio circuit breaker

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
