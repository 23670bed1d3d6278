//! # Shipyard Core
//!
//! Resilience engine for unreliable infrastructure operations: image pulls
//! and pushes, manifest applies, cluster API calls.
//!
//! This crate contains:
//! - Retry policies and the retry executor ([`ResilienceEngine`])
//! - Priority-ordered fallback chains and their strategies
//! - Bounded per-operation attempt history and aggregated metrics
//! - Built-in policies and chains, and configuration loading
//!
//! ## Architecture Principles
//! - Generic primitives (classifier, backoff, circuit breaker, learner) live
//!   in `shipyard-common`
//! - The engine is an explicit value, constructed once and shared by
//!   reference; there are no global registries
//! - Operations are opaque async callbacks; only their errors are inspected

pub mod config;
pub mod context;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod history;
pub mod metrics;
pub mod policy;

pub use config::EngineConfig;
pub use context::{AttemptContext, OperationContext, Parameters, IMAGE_PARAM};
pub use engine::{ExecutionOutcome, ResilienceEngine};
pub use error::{BoxedError, EngineError, EngineResult};
pub use fallback::{
    FallbackAction, FallbackChain, FallbackCondition, FallbackError, FallbackHandler,
    FallbackRequest, FallbackResult, FallbackStrategy,
};
pub use history::{OperationAttempt, DEFAULT_MAX_HISTORY};
pub use metrics::RetryMetrics;
pub use policy::{RetryPolicy, DEFAULT_POLICY};
// Re-export the primitives that appear in this crate's public API
pub use shipyard_common::resilience::{
    AdaptiveSettings, BackoffStrategy, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState,
    ErrorCategory, MockClock, RetryCondition, SharedClock, SystemClock,
};
