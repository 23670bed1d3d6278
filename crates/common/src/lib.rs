//! Generic building blocks shared across Shipyard crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, serde helpers, utility macros
//! - `runtime`: resilience primitives (clock, error classifier, backoff,
//!   circuit breaker, adaptive learner)
//! - `observability`: optional tracing (implied by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
#[macro_use]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    AdaptiveLearner, AdaptiveSettings, Backoff, BackoffStrategy, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerStatus, CircuitState, Clock,
    ErrorCategory, MatchOperator, MockClock, RetryCondition, RetryRules, SharedClock, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, option_duration_millis};
