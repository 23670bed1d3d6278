//! Adaptive retry-delay learning
//!
//! Each operation name keeps an exponential moving average of its latency
//! and success rate. The derived optimal delay is
//! `avg_latency * (2 - success_rate)`: a healthy operation waits about one
//! latency between attempts, a failing one up to two.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CommonError, CommonResult};
use crate::utils::serde::duration_millis;

/// Smoothing factor applied to every new sample
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Learned state for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    pub operation: String,
    #[serde(with = "duration_millis")]
    pub average_latency: Duration,
    pub success_rate: f64,
    #[serde(with = "duration_millis")]
    pub optimal_retry_delay: Duration,
    pub learning_rate: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl AdaptiveSettings {
    fn empty(operation: &str, learning_rate: f64) -> Self {
        Self {
            operation: operation.to_string(),
            average_latency: Duration::ZERO,
            success_rate: 0.0,
            optimal_retry_delay: Duration::ZERO,
            learning_rate,
            sample_count: 0,
            last_updated: Utc::now(),
        }
    }

    fn observe(&mut self, duration: Duration, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        let latency = duration.as_secs_f64();

        let (avg, rate) = if self.sample_count == 0 {
            (latency, outcome)
        } else {
            let alpha = self.learning_rate;
            (
                self.average_latency.as_secs_f64() * (1.0 - alpha) + latency * alpha,
                self.success_rate * (1.0 - alpha) + outcome * alpha,
            )
        };

        self.average_latency = Duration::try_from_secs_f64(avg).unwrap_or(duration);
        self.success_rate = rate.clamp(0.0, 1.0);
        self.optimal_retry_delay =
            Duration::try_from_secs_f64(avg * (2.0 - self.success_rate))
                .unwrap_or(self.average_latency);
        self.sample_count += 1;
        self.last_updated = Utc::now();
    }
}

/// Per-operation EMA learner
#[derive(Debug)]
pub struct AdaptiveLearner {
    learning_rate: f64,
    settings: DashMap<String, AdaptiveSettings>,
}

impl Default for AdaptiveLearner {
    fn default() -> Self {
        Self { learning_rate: DEFAULT_LEARNING_RATE, settings: DashMap::new() }
    }
}

impl AdaptiveLearner {
    /// Learner with the default learning rate
    pub fn new() -> Self {
        Self::default()
    }

    /// Learner with a custom learning rate in `(0, 1]`
    pub fn with_learning_rate(learning_rate: f64) -> CommonResult<Self> {
        if !(learning_rate > 0.0 && learning_rate <= 1.0) {
            return Err(CommonError::validation_with_value(
                "learning_rate",
                "must be in (0, 1]",
                learning_rate.to_string(),
            ));
        }
        Ok(Self { learning_rate, settings: DashMap::new() })
    }

    /// Fold one terminal outcome into the operation's averages
    pub fn update(&self, operation: &str, duration: Duration, success: bool) -> AdaptiveSettings {
        let mut entry = self
            .settings
            .entry(operation.to_string())
            .or_insert_with(|| AdaptiveSettings::empty(operation, self.learning_rate));
        entry.observe(duration, success);

        debug!(
            operation,
            average_latency_ms = entry.average_latency.as_millis(),
            success_rate = entry.success_rate,
            optimal_delay_ms = entry.optimal_retry_delay.as_millis(),
            "Updated adaptive retry settings"
        );
        entry.clone()
    }

    /// Learned optimal delay, if the operation has any samples
    pub fn optimal_delay(&self, operation: &str) -> Option<Duration> {
        self.settings
            .get(operation)
            .filter(|s| s.sample_count > 0)
            .map(|s| s.optimal_retry_delay)
    }

    /// Snapshot of one operation's learned settings
    pub fn settings(&self, operation: &str) -> Option<AdaptiveSettings> {
        self.settings.get(operation).map(|s| s.clone())
    }

    /// Snapshot of every operation's learned settings
    pub fn all_settings(&self) -> Vec<AdaptiveSettings> {
        self.settings.iter().map(|s| s.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the adaptive learner.

    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    /// Validates seeding on the first sample.
    ///
    /// Assertions:
    /// - Confirms latency and success rate are taken verbatim.
    /// - Confirms the optimal delay equals latency on success.
    #[test]
    fn test_first_sample_seeds() {
        let learner = AdaptiveLearner::new();
        let s = learner.update("docker_pull", Duration::from_secs(2), true);
        assert_eq!(s.average_latency, Duration::from_secs(2));
        assert!(approx(s.success_rate, 1.0));
        assert_eq!(s.optimal_retry_delay, Duration::from_secs(2));
        assert_eq!(s.sample_count, 1);

        let f = learner.update("kubectl_apply", Duration::from_secs(1), false);
        assert!(approx(f.success_rate, 0.0));
        assert_eq!(f.optimal_retry_delay, Duration::from_secs(2));
    }

    /// Validates one EMA step.
    ///
    /// Assertions:
    /// - Confirms `avg = 0.9 * 1s + 0.1 * 3s = 1.2s`.
    /// - Confirms `rate = 0.9 * 1.0 + 0.1 * 0.0 = 0.9`.
    /// - Confirms `optimal = 1.2s * 1.1`.
    #[test]
    fn test_ema_step() {
        let learner = AdaptiveLearner::new();
        learner.update("push", Duration::from_secs(1), true);
        let s = learner.update("push", Duration::from_secs(3), false);
        assert!(approx(s.average_latency.as_secs_f64(), 1.2));
        assert!(approx(s.success_rate, 0.9));
        assert!(approx(s.optimal_retry_delay.as_secs_f64(), 1.32));
    }

    /// Validates convergence under identical successful samples.
    #[test]
    fn test_converges_on_identical_samples() {
        let learner = AdaptiveLearner::new();
        learner.update("pull", Duration::from_secs(5), false);
        for _ in 0..200 {
            learner.update("pull", Duration::from_millis(400), true);
        }
        let s = learner.settings("pull").unwrap();
        assert!(approx(s.average_latency.as_secs_f64(), 0.4));
        assert!(approx(s.success_rate, 1.0));
        assert_eq!(learner.optimal_delay("pull").map(|d| d.as_millis()), Some(400));
    }

    /// Validates learning-rate validation.
    #[test]
    fn test_learning_rate_validation() {
        assert!(AdaptiveLearner::with_learning_rate(0.0).is_err());
        assert!(AdaptiveLearner::with_learning_rate(1.5).is_err());
        assert!(AdaptiveLearner::with_learning_rate(f64::NAN).is_err());
        let learner = AdaptiveLearner::with_learning_rate(0.5).unwrap();
        assert!(approx(learner.update("x", Duration::ZERO, true).learning_rate, 0.5));
    }

    /// Validates lookups for unknown operations.
    #[test]
    fn test_unknown_operation() {
        let learner = AdaptiveLearner::new();
        assert!(learner.optimal_delay("missing").is_none());
        assert!(learner.settings("missing").is_none());
        assert!(learner.all_settings().is_empty());
    }
}
