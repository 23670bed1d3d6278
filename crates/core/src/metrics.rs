//! Aggregated per-operation retry metrics
//!
//! Counters are rebuilt from zero for each engine instance and never
//! persisted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shipyard_common::duration_millis;

/// Counters for one operation name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryMetrics {
    pub operation: String,
    /// Attempts across every invocation
    pub total_attempts: u64,
    /// Invocations that reached a terminal outcome
    pub invocations: u64,
    /// Invocations that succeeded after at least one retry
    pub successful_retries: u64,
    /// Invocations that ended without a result from the operation itself
    pub failed_retries: u64,
    pub average_retries: f64,
    /// Largest attempt count seen in one invocation
    pub max_retries: u32,
    pub fallbacks_used: u64,
    pub circuit_breaker_trips: u64,
    #[serde(with = "duration_millis")]
    pub total_retry_time: Duration,
    #[serde(with = "duration_millis")]
    pub average_retry_time: Duration,
    pub last_updated: DateTime<Utc>,
}

impl RetryMetrics {
    fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            total_attempts: 0,
            invocations: 0,
            successful_retries: 0,
            failed_retries: 0,
            average_retries: 0.0,
            max_retries: 0,
            fallbacks_used: 0,
            circuit_breaker_trips: 0,
            total_retry_time: Duration::ZERO,
            average_retry_time: Duration::ZERO,
            last_updated: Utc::now(),
        }
    }

    fn observe(&mut self, attempts: u32, elapsed: Duration) {
        self.invocations += 1;
        self.total_attempts += u64::from(attempts);
        self.max_retries = self.max_retries.max(attempts);
        self.total_retry_time = self.total_retry_time.saturating_add(elapsed);

        #[allow(clippy::cast_precision_loss)]
        {
            self.average_retries = self.total_attempts as f64 / self.invocations as f64;
        }
        self.average_retry_time = u32::try_from(self.invocations)
            .map_or(self.average_retry_time, |n| self.total_retry_time / n);
        self.last_updated = Utc::now();
    }
}

/// Concurrent metrics registry keyed by operation name
#[derive(Debug, Default)]
pub struct MetricsStore {
    metrics: DashMap<String, RetryMetrics>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, operation: &str, apply: impl FnOnce(&mut RetryMetrics)) {
        let mut entry =
            self.metrics.entry(operation.to_string()).or_insert_with(|| RetryMetrics::new(operation));
        apply(&mut entry);
    }

    /// The operation produced a result after `attempts` attempts
    pub fn record_success(&self, operation: &str, attempts: u32, elapsed: Duration) {
        self.update(operation, |m| {
            m.observe(attempts, elapsed);
            if attempts > 1 {
                m.successful_retries += 1;
            }
        });
    }

    /// The invocation ended in an error
    pub fn record_failure(&self, operation: &str, attempts: u32, elapsed: Duration) {
        self.update(operation, |m| {
            m.observe(attempts, elapsed);
            m.failed_retries += 1;
        });
    }

    /// A fallback strategy absorbed the failure
    pub fn record_fallback(&self, operation: &str, attempts: u32, elapsed: Duration) {
        self.update(operation, |m| {
            m.observe(attempts, elapsed);
            m.fallbacks_used += 1;
        });
    }

    /// A failure of this operation opened its circuit
    pub fn record_trip(&self, operation: &str) {
        self.update(operation, |m| {
            m.circuit_breaker_trips += 1;
            m.last_updated = Utc::now();
        });
    }

    pub fn get(&self, operation: &str) -> Option<RetryMetrics> {
        self.metrics.get(operation).map(|m| m.clone())
    }

    pub fn all(&self) -> HashMap<String, RetryMetrics> {
        self.metrics.iter().map(|m| (m.key().clone(), m.value().clone())).collect()
    }
}
