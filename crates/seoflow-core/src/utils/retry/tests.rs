use super::*;

#[test]
fn test_retry_policy_defaults() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.base_backoff, Duration::from_millis(200));
    assert_eq!(policy.backoff_multiplier, 2.0);
    assert!(policy.jitter);
}

#[test]
fn test_retry_policy_builder() {
    let policy = RetryPolicy::new()
        .with_max_attempts(5)
        .with_base_backoff(Duration::from_millis(50))
        .with_max_backoff(Duration::from_secs(30))
        .with_backoff_multiplier(3.0)
        .with_jitter(false);

    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.base_backoff, Duration::from_millis(50));
    assert_eq!(policy.max_backoff, Duration::from_secs(30));
    assert_eq!(policy.backoff_multiplier, 3.0);
    assert!(!policy.jitter);
}

#[test]
fn test_zero_attempts_is_clamped_to_one() {
    let policy = RetryPolicy::new().with_max_attempts(0);
    assert_eq!(policy.max_attempts, 1);
    assert!(!policy.allows_retry_after(1));
}

#[test]
fn test_delay_grows_exponentially() {
    let policy = RetryPolicy::new()
        .with_base_backoff(Duration::from_millis(100))
        .with_backoff_multiplier(2.0)
        .with_jitter(false);

    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    assert_eq!(policy.delay_after(3), Duration::from_millis(400));
}

#[test]
fn test_delay_respects_max() {
    let policy = RetryPolicy::new()
        .with_base_backoff(Duration::from_secs(1))
        .with_max_backoff(Duration::from_secs(5))
        .with_backoff_multiplier(10.0)
        .with_jitter(false);

    assert_eq!(policy.delay_after(3), Duration::from_secs(5));
}

#[test]
fn test_jitter_stays_within_half_to_one_and_a_half() {
    let policy = RetryPolicy::new()
        .with_base_backoff(Duration::from_millis(1000))
        .with_jitter(true);

    for _ in 0..200 {
        let delay = policy.delay_after(1);
        assert!(delay >= Duration::from_millis(500), "{:?}", delay);
        assert!(delay < Duration::from_millis(1500), "{:?}", delay);
    }
}

#[test]
fn test_allows_retry_after() {
    let policy = RetryPolicy::new().with_max_attempts(3);
    assert!(policy.allows_retry_after(1));
    assert!(policy.allows_retry_after(2));
    assert!(!policy.allows_retry_after(3));
}
