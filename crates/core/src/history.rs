//! Bounded per-operation attempt history

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shipyard_common::duration_millis;
use shipyard_common::resilience::ErrorCategory;

use crate::context::Parameters;

/// History size used when none (or zero) is configured
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Record of one attempt, appended in attempt order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationAttempt {
    /// `<operation id>_attempt_<n>`
    pub id: String,
    pub operation: String,
    pub attempt: u32,
    /// When the attempt started
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub retry_policy: String,
    /// Strategy that absorbed the failure, set after the fact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Per-operation FIFO logs; different operations never contend
#[derive(Debug)]
pub struct HistoryStore {
    max_size: usize,
    entries: DashMap<String, VecDeque<OperationAttempt>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryStore {
    /// Store keeping at most `max_size` records per operation; 0 selects
    /// [`DEFAULT_MAX_HISTORY`]
    pub fn new(max_size: usize) -> Self {
        let max_size = if max_size == 0 { DEFAULT_MAX_HISTORY } else { max_size };
        Self { max_size, entries: DashMap::new() }
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append a record, evicting the oldest once the bound is exceeded
    pub fn record(&self, attempt: OperationAttempt) {
        let mut log = self.entries.entry(attempt.operation.clone()).or_default();
        log.push_back(attempt);
        while log.len() > self.max_size {
            log.pop_front();
        }
    }

    /// Annotate a stored record with the fallback strategy that replaced it
    ///
    /// Returns `false` if the record has already been evicted.
    pub fn mark_fallback(&self, operation: &str, attempt_id: &str, strategy: &str) -> bool {
        let Some(mut log) = self.entries.get_mut(operation) else {
            return false;
        };
        match log.iter_mut().rev().find(|a| a.id == attempt_id) {
            Some(attempt) => {
                attempt.fallback_used = Some(strategy.to_string());
                true
            }
            None => false,
        }
    }

    /// The most recent `limit` records in attempt order; 0 returns all
    pub fn recent(&self, operation: &str, limit: usize) -> Vec<OperationAttempt> {
        let Some(log) = self.entries.get(operation) else {
            return Vec::new();
        };
        let take = if limit == 0 { log.len() } else { limit.min(log.len()) };
        log.iter().skip(log.len() - take).cloned().collect()
    }

    pub fn len(&self, operation: &str) -> usize {
        self.entries.get(operation).map_or(0, |log| log.len())
    }

    pub fn is_empty(&self, operation: &str) -> bool {
        self.len(operation) == 0
    }
}
