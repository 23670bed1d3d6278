//! Built-in policies and fallback chains
//!
//! These values are part of the engine's compatibility surface: callers and
//! stored configurations refer to them by name.

use std::time::Duration;

use shipyard_common::resilience::{BackoffStrategy, CircuitBreakerConfig, ErrorCategory};

use crate::fallback::{
    CachedImage, DegradedMode, FallbackAction, FallbackChain, FallbackCondition, FallbackStrategy,
    ImageVariant, RegistrySwitch, DEFAULT_CHAIN,
};
use crate::policy::RetryPolicy;

pub const STANDARD_POLICY: &str = "standard";
pub const AGGRESSIVE_POLICY: &str = "aggressive";
pub const CONSERVATIVE_POLICY: &str = "conservative";
pub const DOCKER_PULL_CHAIN: &str = "docker_pull";

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

fn patterns(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// General purpose policy: 3 attempts, 1s..30s exponential backoff
pub fn standard_policy() -> RetryPolicy {
    RetryPolicy {
        name: STANDARD_POLICY.to_string(),
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_strategy: BackoffStrategy::Exponential,
        backoff_multiplier: 2.0,
        jitter: true,
        jitter_range: 0.1,
        retryable_errors: patterns(&["timeout", "network", "server error", "rate limit"]),
        non_retryable_errors: patterns(&["unauthorized", "forbidden", "not found", "bad request"]),
        operation_timeout: Some(minutes(5)),
        total_timeout: Some(minutes(15)),
        ..RetryPolicy::default()
    }
}

/// Critical operations: more attempts, circuit breaking and adaptive learning
pub fn aggressive_policy() -> RetryPolicy {
    RetryPolicy {
        name: AGGRESSIVE_POLICY.to_string(),
        max_attempts: 5,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(60),
        backoff_strategy: BackoffStrategy::Exponential,
        backoff_multiplier: 1.5,
        jitter: true,
        jitter_range: 0.2,
        retryable_errors: patterns(&[
            "timeout",
            "network",
            "server error",
            "rate limit",
            "connection",
        ]),
        operation_timeout: Some(minutes(10)),
        total_timeout: Some(minutes(30)),
        enable_circuit_breaker: true,
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: minutes(5),
            half_open_max_calls: 3,
            monitoring_window: Some(minutes(10)),
        }),
        enable_adaptive: true,
        ..RetryPolicy::default()
    }
}

/// Cheap retries only: 2 attempts, linear 2s..10s, no jitter
pub fn conservative_policy() -> RetryPolicy {
    RetryPolicy {
        name: CONSERVATIVE_POLICY.to_string(),
        max_attempts: 2,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(10),
        backoff_strategy: BackoffStrategy::Linear,
        backoff_multiplier: 1.0,
        jitter: false,
        jitter_range: 0.0,
        retryable_errors: patterns(&["timeout", "rate limit"]),
        operation_timeout: Some(minutes(2)),
        total_timeout: Some(minutes(5)),
        ..RetryPolicy::default()
    }
}

/// Every built-in named policy
pub fn default_policies() -> Vec<RetryPolicy> {
    vec![standard_policy(), aggressive_policy(), conservative_policy()]
}

/// Registry switch, then base-image variant, then a locally cached image
pub fn docker_pull_chain() -> FallbackChain {
    FallbackChain::new(DOCKER_PULL_CHAIN)
        .with_description("Fallback strategies for Docker pull operations")
        .with_max_fallbacks(3)
        .with_strategy(
            FallbackStrategy::new(
                "alternative_registry",
                FallbackAction::RegistrySwitch(RegistrySwitch::new("docker.io")),
            )
            .with_description("Switch to alternative Docker registry")
            .with_priority(1)
            .with_condition(FallbackCondition::error_category(ErrorCategory::Network)),
        )
        .with_strategy(
            FallbackStrategy::new(
                "image_variant",
                FallbackAction::ImageVariant(ImageVariant::new([
                    ("ubuntu", "alpine"),
                    ("centos", "alpine"),
                ])),
            )
            .with_description("Use alternative image variant")
            .with_priority(2),
        )
        .with_strategy(
            FallbackStrategy::new("cached_image", FallbackAction::CachedImage(CachedImage::default()))
                .with_description("Use locally cached image")
                .with_priority(3),
        )
}

/// Last resort for every operation without its own chain
pub fn default_chain() -> FallbackChain {
    FallbackChain::new(DEFAULT_CHAIN)
        .with_description("Default fallback strategies for all operations")
        .with_max_fallbacks(2)
        .with_strategy(
            FallbackStrategy::new("degraded_mode", FallbackAction::DegradedMode(DegradedMode::default()))
                .with_description("Continue in degraded mode")
                .with_priority(10),
        )
}

/// Every built-in fallback chain
pub fn default_fallback_chains() -> Vec<FallbackChain> {
    vec![docker_pull_chain(), default_chain()]
}
