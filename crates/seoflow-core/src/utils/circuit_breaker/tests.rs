use super::*;

#[test]
fn test_circuit_breaker_config_defaults() {
    let config = CircuitBreakerConfig::default();
    assert_eq!(config.failure_ratio, 0.5);
    assert_eq!(config.min_requests, 5);
    assert_eq!(config.cooldown, Duration::from_secs(30));
}

#[test]
fn test_circuit_breaker_config_builder() {
    let config = CircuitBreakerConfig::new()
        .with_failure_ratio(0.8)
        .with_min_requests(10)
        .with_success_threshold(3)
        .with_cooldown(Duration::from_secs(60))
        .with_failure_window(Duration::from_secs(120));

    assert_eq!(config.failure_ratio, 0.8);
    assert_eq!(config.min_requests, 10);
    assert_eq!(config.success_threshold, 3);
    assert_eq!(config.cooldown, Duration::from_secs(60));
    assert_eq!(config.failure_window, Duration::from_secs(120));
}

#[test]
fn test_circuit_breaker_initial_state() {
    let cb = CircuitBreaker::with_defaults("test");
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.can_execute());
    assert_eq!(cb.failure_ratio(), 0.0);
}

#[test]
fn test_needs_min_requests_before_opening() {
    let config = CircuitBreakerConfig::new()
        .with_min_requests(3)
        .with_failure_ratio(0.5);
    let cb = CircuitBreaker::new("test", config);

    cb.record_failure();
    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Closed);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert!(!cb.can_execute());
}

#[test]
fn test_successes_keep_ratio_below_threshold() {
    let config = CircuitBreakerConfig::new()
        .with_min_requests(4)
        .with_failure_ratio(0.75);
    let cb = CircuitBreaker::new("test", config);

    cb.record_success();
    cb.record_success();
    cb.record_failure();
    cb.record_failure();

    assert_eq!(cb.failure_ratio(), 0.5);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[test]
fn test_outcomes_outside_window_are_forgotten() {
    let config = CircuitBreakerConfig::new()
        .with_min_requests(2)
        .with_failure_ratio(1.0)
        .with_failure_window(Duration::from_millis(30));
    let cb = CircuitBreaker::new("test", config);

    cb.record_failure();
    std::thread::sleep(Duration::from_millis(50));
    cb.record_failure();

    assert_eq!(cb.state(), CircuitState::Closed);
}

#[test]
fn test_half_open_after_cooldown_then_closes_on_success() {
    let config = CircuitBreakerConfig::new()
        .with_min_requests(1)
        .with_failure_ratio(0.5)
        .with_cooldown(Duration::from_millis(30));
    let cb = CircuitBreaker::new("test", config);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert!(cb.can_execute());

    cb.record_success();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[test]
fn test_half_open_failure_reopens() {
    let config = CircuitBreakerConfig::new()
        .with_min_requests(1)
        .with_cooldown(Duration::from_millis(30));
    let cb = CircuitBreaker::new("test", config);

    cb.record_failure();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);
}

#[test]
fn test_circuit_breaker_reset() {
    let config = CircuitBreakerConfig::new().with_min_requests(1);
    let cb = CircuitBreaker::new("test", config);

    cb.record_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    cb.reset();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.can_execute());
}

#[test]
fn test_circuit_state_display() {
    assert_eq!(format!("{}", CircuitState::Closed), "Closed");
    assert_eq!(format!("{}", CircuitState::Open), "Open");
    assert_eq!(format!("{}", CircuitState::HalfOpen), "HalfOpen");
}
