//! Fallback orchestration
//!
//! When the retry loop gives up, the engine hands the failure to a
//! [`FallbackChain`]: the chain registered under the operation name, or the
//! `default` chain. Strategies run in ascending priority until one produces
//! a [`FallbackResult`].
//!
//! - [`chain`]: chain, strategy and condition model (serde-configurable)
//! - [`handler`]: the [`FallbackHandler`] capability and built-in strategies
//! - [`orchestrator`]: chain selection and execution

pub mod chain;
pub mod handler;
pub mod orchestrator;

pub use chain::{
    ComparisonOperator, EqualityOperator, FallbackAction, FallbackChain, FallbackCondition,
    FallbackStrategy, ParameterOperator,
};
pub use handler::{
    CachedImage, CustomAction, DegradedMode, FallbackError, FallbackHandler, FallbackRequest,
    FallbackResult, ImageVariant, RegistrySwitch,
};
pub use orchestrator::{FallbackOrchestrator, DEFAULT_CHAIN};
