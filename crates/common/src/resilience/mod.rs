//! Resilience primitives for fault-tolerant operation execution
//!
//! This module provides the **generic, reusable** building blocks of the
//! resilience engine:
//! - **[`classifier`]**: maps failure text to a coarse [`ErrorCategory`] and
//!   decides retryability against a policy's rules
//! - **[`backoff`]**: delay calculation for five growth strategies with cap
//!   and proportional jitter
//! - **[`circuit_breaker`]**: the closed/open/half-open state machine
//! - **[`adaptive`]**: per-operation EMA learning of latency and success rate
//! - **[`clock`]**: time abstraction so timeouts can be tested without
//!   sleeping
//!
//! None of these types know about policies, fallbacks or history; the
//! `shipyard-core` engine composes them.

pub mod adaptive;
pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod clock;

pub use adaptive::{AdaptiveLearner, AdaptiveSettings, DEFAULT_LEARNING_RATE};
pub use backoff::{Backoff, BackoffStrategy};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerStatus,
    CircuitState,
};
pub use classifier::{
    ErrorCategory, MatchOperator, RetryCondition, RetryRules, KNOWN_TERMINAL_PATTERNS,
};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
