//! Integration tests for resilience module
//!
//! Tests the classifier, backoff calculator, circuit breaker and adaptive
//! learner together, the way the retry executor composes them.

#![cfg(feature = "runtime")]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use shipyard_common::resilience::{
    AdaptiveLearner, Backoff, BackoffStrategy, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, ErrorCategory, MockClock, RetryCondition, RetryRules, SharedClock,
};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn breaker_config(failures: u32, successes: u32, timeout: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_threshold(failures)
        .success_threshold(successes)
        .timeout(timeout)
        .half_open_max_calls(1)
        .build()
        .expect("valid breaker config")
}

/// Validates the full closed -> open -> half-open -> closed cycle.
///
/// # Test Steps
/// 1. Record failures up to the threshold
/// 2. Verify calls are rejected until the timeout has strictly elapsed
/// 3. Admit a single probe and close after the success threshold
///
/// Assertions:
/// - Confirms each transition is reported exactly once.
/// - Confirms the failure count is reset after closing.
#[test]
fn test_circuit_breaker_full_cycle() {
    let clock = MockClock::new();
    let breaker =
        CircuitBreaker::with_clock("registry", breaker_config(3, 2, Duration::from_secs(30)), clock.clone())
            .unwrap();

    assert_eq!(breaker.record_failure(), None);
    assert_eq!(breaker.record_failure(), None);
    assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
    assert!(!breaker.can_execute());

    clock.advance(Duration::from_secs(30));
    assert!(!breaker.can_execute(), "timeout must be strictly exceeded");

    clock.advance(Duration::from_millis(1));
    assert!(breaker.can_execute());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(!breaker.can_execute(), "only one probe is admitted");

    assert_eq!(breaker.record_success(), None);
    assert!(breaker.can_execute());
    assert_eq!(breaker.record_success(), Some(CircuitState::Closed));

    let status = breaker.status();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.trips, 1);
}

/// Validates that a half-open failure reopens immediately.
#[test]
fn test_half_open_failure_reopens() {
    let clock = MockClock::new();
    let breaker =
        CircuitBreaker::with_clock("kube_api", breaker_config(1, 3, Duration::from_secs(5)), clock.clone())
            .unwrap();

    breaker.record_failure();
    clock.advance(Duration::from_secs(6));
    assert!(breaker.can_execute());
    assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
    assert!(!breaker.can_execute());
    assert_eq!(breaker.status().trips, 2);
}

/// Validates consecutive-failure semantics and the monitoring window.
///
/// Assertions:
/// - Confirms a success while closed resets the failure streak.
/// - Confirms failures further apart than the window restart the count.
#[test]
fn test_failure_streaks() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .monitoring_window(Duration::from_secs(60))
        .build()
        .unwrap();
    let breaker = CircuitBreaker::with_clock("push", config, clock.clone()).unwrap();

    breaker.record_failure();
    breaker.record_success();
    assert_eq!(breaker.record_failure(), None);

    clock.advance(Duration::from_secs(61));
    assert_eq!(breaker.record_failure(), None);
    assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
}

/// Validates that released probes free their half-open slot and that a
/// manual reset closes the breaker.
#[test]
fn test_release_and_reset() {
    let clock = MockClock::new();
    let breaker =
        CircuitBreaker::with_clock("pull", breaker_config(1, 1, Duration::from_secs(1)), clock.clone())
            .unwrap();

    breaker.record_failure();
    clock.advance(Duration::from_secs(2));
    assert!(breaker.can_execute());
    assert!(!breaker.can_execute());
    breaker.release();
    assert!(breaker.can_execute());

    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
}

/// Validates a breaker shared across threads through a shared clock.
///
/// Assertions:
/// - Confirms concurrent failures trip the breaker exactly once.
#[test]
fn test_breaker_shared_across_threads() {
    let clock: SharedClock = Arc::new(MockClock::new());
    let breaker = Arc::new(
        CircuitBreaker::with_clock("apply", breaker_config(10, 1, Duration::from_secs(60)), clock).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            thread::spawn(move || {
                (0..5).filter(|_| breaker.record_failure() == Some(CircuitState::Open)).count()
            })
        })
        .collect();

    let opened: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(opened, 1);
    assert_eq!(breaker.status().trips, 1);
    assert!(!breaker.can_execute());
}

/// Validates that every growth strategy is non-decreasing and capped.
#[test]
fn test_backoff_monotonic_and_capped() {
    let strategies = [
        BackoffStrategy::Constant,
        BackoffStrategy::Linear,
        BackoffStrategy::Exponential,
        BackoffStrategy::Cubic,
        BackoffStrategy::Adaptive,
    ];

    for strategy in strategies {
        let backoff =
            Backoff::new(strategy, Duration::from_millis(100), Duration::from_secs(5), 2.0);
        let delays: Vec<_> = (1..=20).map(|n| backoff.capped_delay(n, None)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{strategy:?} decreased");
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)), "{strategy:?} exceeded cap");
    }
}

/// Validates jitter bounds and reproducibility with a seeded RNG.
///
/// Assertions:
/// - Confirms every jittered delay stays within `±range` of the base.
/// - Confirms identical seeds give identical schedules.
#[test]
fn test_backoff_jitter_bounds() {
    let backoff = Backoff::new(
        BackoffStrategy::Exponential,
        Duration::from_millis(500),
        Duration::from_secs(60),
        1.5,
    )
    .with_jitter(0.2);

    let mut rng = StdRng::seed_from_u64(7);
    for attempt in 1..=8 {
        let expected = backoff.capped_delay(attempt, None).as_secs_f64();
        let jittered = backoff.delay_with_rng(attempt, None, &mut rng).as_secs_f64();
        assert!((jittered - expected).abs() <= expected * 0.2 + 1e-9);
    }

    let schedule = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        (1..=5).map(|n| backoff.delay_with_rng(n, None, &mut rng)).collect::<Vec<_>>()
    };
    assert_eq!(schedule(42), schedule(42));
}

/// Validates the adaptive strategy consuming learned delays.
///
/// Assertions:
/// - Confirms learned latency drives the delay once samples exist.
/// - Confirms failures push the suggested delay above observed latency.
#[test]
fn test_learner_feeds_adaptive_backoff() {
    let learner = AdaptiveLearner::new();
    let backoff = Backoff::new(
        BackoffStrategy::Adaptive,
        Duration::from_millis(100),
        Duration::from_secs(30),
        2.0,
    );

    assert_eq!(learner.optimal_delay("pull"), None);
    assert_eq!(backoff.capped_delay(2, learner.optimal_delay("pull")), Duration::from_secs(2));

    for _ in 0..30 {
        learner.update("pull", Duration::from_millis(400), true);
    }
    let learned = learner.optimal_delay("pull").unwrap();
    assert!((learned.as_secs_f64() - 0.4).abs() < 1e-6);
    let delay = backoff.capped_delay(3, Some(learned));
    assert!((delay.as_secs_f64() - 1.2).abs() < 1e-6);

    learner.update("pull", Duration::from_millis(400), false);
    let settings = learner.settings("pull").unwrap();
    assert!((settings.success_rate - 0.9).abs() < 1e-9);
    assert!(settings.optimal_retry_delay > Duration::from_millis(400));
    assert_eq!(learner.all_settings().len(), 1);
}

/// Validates retryability decisions across pattern lists and conditions.
#[test]
fn test_retry_rules_precedence() {
    let retryable = strings(&["timeout", "network"]);
    let non_retryable = strings(&["unauthorized"]);
    let rules = RetryRules::new(&retryable, &non_retryable, &[]);

    assert!(rules.is_retryable("network timeout"));
    assert!(!rules.is_retryable("network unauthorized"));
    assert!(!rules.is_retryable("disk full"), "allow list must be matched");

    let conditions = [RetryCondition::regex(r"^HTTP 5\d\d"), RetryCondition::equals("EAGAIN")];
    let rules = RetryRules::new(&[], &[], &conditions);
    assert!(rules.is_retryable("HTTP 503 upstream"));
    assert!(rules.is_retryable("EAGAIN"));
    assert!(rules.is_retryable("something odd"));
    assert!(!rules.is_retryable("resource gone"));
    assert!(!rules.is_retryable("manifest not found"));
}

/// Validates categorization order on messages matching several probes.
#[test]
fn test_categorize_priority() {
    assert_eq!(ErrorCategory::categorize("network timeout"), ErrorCategory::Timeout);
    assert_eq!(ErrorCategory::categorize("network unreachable"), ErrorCategory::Network);
    assert_eq!(ErrorCategory::categorize("401 unauthorized"), ErrorCategory::Auth);
    assert_eq!(ErrorCategory::categorize("rate limit exceeded"), ErrorCategory::RateLimit);
    assert_eq!(ErrorCategory::categorize("Timeout"), ErrorCategory::Unknown);
    assert_eq!(ErrorCategory::ServerError.as_str(), "server_error");
}
