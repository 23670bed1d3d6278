//! Retry policy model
//!
//! A [`RetryPolicy`] is the unit of retry configuration: how many attempts,
//! how long to wait between them, which failures qualify for another try,
//! and whether a circuit breaker guards the operations that use it.
//! Policies are immutable once registered on the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shipyard_common::resilience::{
    Backoff, BackoffStrategy, CircuitBreakerConfig, RetryCondition, RetryRules,
};
use shipyard_common::{duration_millis, option_duration_millis};

use crate::error::{EngineError, EngineResult};

/// Name of the policy used when a caller names no policy or an unknown one
pub const DEFAULT_POLICY: &str = "default";

/// Named retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub name: String,
    /// Total attempts including the first; at least 1
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Fraction of the delay used as the jitter amplitude, `0.0..=1.0`
    pub jitter_range: f64,
    pub retryable_errors: Vec<String>,
    pub non_retryable_errors: Vec<String>,
    pub retry_conditions: Vec<RetryCondition>,
    /// Bound on a single attempt
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub operation_timeout: Option<Duration>,
    /// Bound on the whole invocation, measured from the first attempt
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<Duration>,
    pub enable_circuit_breaker: bool,
    /// Breaker settings; defaults apply when the breaker is enabled without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Feed outcomes to the adaptive learner even when engine-wide learning
    /// is off
    pub enable_adaptive: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            name: DEFAULT_POLICY.to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range: 0.1,
            retryable_errors: Vec::new(),
            non_retryable_errors: Vec::new(),
            retry_conditions: Vec::new(),
            operation_timeout: Some(Duration::from_secs(5 * 60)),
            total_timeout: Some(Duration::from_secs(15 * 60)),
            enable_circuit_breaker: false,
            circuit_breaker: None,
            enable_adaptive: false,
        }
    }
}

impl RetryPolicy {
    /// Default settings under a new name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Check the policy before registration
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidPolicy`] naming the offending setting.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |reason: &str| EngineError::InvalidPolicy {
            policy: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid("max_delay must not be below base_delay"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier must be a finite value >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_range) {
            return Err(invalid("jitter_range must be within 0.0..=1.0"));
        }
        if matches!(self.operation_timeout, Some(d) if d.is_zero()) {
            return Err(invalid("operation_timeout must be greater than zero"));
        }
        if matches!(self.total_timeout, Some(d) if d.is_zero()) {
            return Err(invalid("total_timeout must be greater than zero"));
        }
        if let Some(config) = self.breaker_config() {
            config.validate().map_err(|e| invalid(&e.to_string()))?;
        }
        Ok(())
    }

    /// Delay calculator for this policy
    pub fn backoff(&self) -> Backoff {
        let backoff = Backoff::new(
            self.backoff_strategy,
            self.base_delay,
            self.max_delay,
            self.backoff_multiplier,
        );
        if self.jitter {
            backoff.with_jitter(self.jitter_range)
        } else {
            backoff
        }
    }

    /// Retryability rules for this policy
    pub fn rules(&self) -> RetryRules<'_> {
        RetryRules::new(&self.retryable_errors, &self.non_retryable_errors, &self.retry_conditions)
    }

    /// Effective breaker configuration, when circuit breaking is enabled
    pub fn breaker_config(&self) -> Option<CircuitBreakerConfig> {
        self.enable_circuit_breaker.then(|| self.circuit_breaker.clone().unwrap_or_default())
    }
}
