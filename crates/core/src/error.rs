// Error types for the resilience engine
use std::time::Duration;

use shipyard_common::error::{CommonError, ErrorSeverity};
use shipyard_common::{impl_error_classification, impl_error_conversion};
use thiserror::Error;

/// Type-erased operation failure carried inside [`EngineError`]
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`ResilienceEngine`](crate::ResilienceEngine)
///
/// Every operation-outcome variant records how many attempts ran and keeps
/// the last underlying failure as its `source`.
#[derive(Debug, Error)]
pub enum EngineError {
    // Common errors handled by CommonError (Config, Validation, NotFound)
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("circuit breaker is open for operation '{operation}' (policy '{policy}')")]
    CircuitOpen { operation: String, policy: String },

    #[error("operation '{operation}' failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: BoxedError,
    },

    #[error("operation '{operation}' failed with a non-retryable error on attempt {attempts}: {source}")]
    NonRetryable {
        operation: String,
        attempts: u32,
        #[source]
        source: BoxedError,
    },

    #[error("operation '{operation}' timed out after {attempts} attempts ({elapsed:?})")]
    TimedOut {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: BoxedError,
    },

    #[error("operation '{operation}' cancelled after {attempts} attempts")]
    Cancelled {
        operation: String,
        attempts: u32,
        #[source]
        last_error: Option<BoxedError>,
    },

    #[error("retry policy '{policy}' is invalid: {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error("circuit breaker not found for policy '{0}'")]
    CircuitBreakerNotFound(String),
}

impl EngineError {
    /// Number of attempts made before this outcome, if it came from an
    /// execution
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::CircuitOpen { .. } => Some(0),
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Last underlying failure, if any attempt produced one
    pub fn last_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Exhausted { source, .. }
            | Self::NonRetryable { source, .. }
            | Self::TimedOut { source, .. } => Some(source.as_ref()),
            Self::Cancelled { last_error, .. } => last_error.as_deref(),
            _ => None,
        }
    }

    /// Whether the caller was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

// Auto-convert std types via CommonError
impl_error_conversion!(EngineError, Common);

impl_error_classification!(EngineError, Common,
    Self::CircuitOpen { .. } => {
        retryable: true,  // Breaker cools down
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Exhausted { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::NonRetryable { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::TimedOut { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Cancelled { .. } => {
        retryable: false,
        severity: ErrorSeverity::Info,
        critical: false,
    },
    Self::InvalidPolicy { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::CircuitBreakerNotFound(_) => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
