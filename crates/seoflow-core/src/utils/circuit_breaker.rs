//! Circuit Breaker pattern implementation
//!
//! Tracks a rolling window of call outcomes. The circuit has three states:
//! - Closed: requests pass through and outcomes are recorded
//! - Open: the failure ratio crossed its threshold, requests are rejected
//! - HalfOpen: the cooldown elapsed, probe requests test recovery

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failure ratio exceeded - requests are rejected
    Open,
    /// Testing recovery - probe requests pass through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in the window that opens the circuit (0.0..=1.0)
    pub failure_ratio: f64,
    /// Outcomes required in the window before the ratio is considered
    pub min_requests: u32,
    /// Rolling window length
    pub failure_window: Duration,
    /// Time spent open before probing
    pub cooldown: Duration,
    /// Consecutive half-open successes needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            min_requests: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure ratio threshold
    #[must_use]
    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set minimum sample size
    #[must_use]
    pub fn with_min_requests(mut self, requests: u32) -> Self {
        self.min_requests = requests.max(1);
        self
    }

    /// Set rolling window
    #[must_use]
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Set cooldown
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set success threshold for half-open state
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }
}

struct BreakerState {
    state: CircuitState,
    /// (when, failed)
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

/// Circuit breaker for one upstream operation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                half_open_successes: 0,
            }),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state, applying the cooldown transition
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);
        inner.state
    }

    /// Failure ratio over the current window
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        let mut inner = self.lock();
        self.prune(&mut inner);
        ratio(&inner.outcomes)
    }

    /// Check if the circuit allows a request
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.outcomes.push_back((Instant::now(), false));
                self.prune(&mut inner);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                debug!(
                    name = %self.name,
                    successes = inner.half_open_successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success in half-open state"
                );
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(name = %self.name, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.outcomes.clear();
                    inner.opened_at = None;
                    inner.half_open_successes = 0;
                }
            }
            // A call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.check_cooldown(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.outcomes.push_back((Instant::now(), true));
                self.prune(&mut inner);

                let total = inner.outcomes.len() as u32;
                let failure_ratio = ratio(&inner.outcomes);
                debug!(
                    name = %self.name,
                    total = total,
                    failure_ratio = failure_ratio,
                    "Circuit breaker failure recorded"
                );

                if total >= self.config.min_requests && failure_ratio >= self.config.failure_ratio {
                    warn!(
                        name = %self.name,
                        failure_ratio = failure_ratio,
                        "Circuit breaker opened"
                    );
                    Self::open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    name = %self.name,
                    "Circuit breaker failure in half-open state, reopening"
                );
                Self::open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.outcomes.clear();
        inner.opened_at = None;
        inner.half_open_successes = 0;
    }

    fn open(inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
    }

    fn check_cooldown(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.config.cooldown);
        if cooled {
            info!(name = %self.name, "Circuit breaker entering half-open state");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            inner.outcomes.clear();
        }
    }

    fn prune(&self, inner: &mut BreakerState) {
        let window = self.config.failure_window;
        while let Some((at, _)) = inner.outcomes.front() {
            if at.elapsed() > window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }
}

fn ratio(outcomes: &VecDeque<(Instant, bool)>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failures = outcomes.iter().filter(|(_, failed)| *failed).count();
    failures as f64 / outcomes.len() as f64
}

#[cfg(test)]
mod tests;
