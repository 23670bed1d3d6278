//! Error classification for retry decisions
//!
//! Failures reach the engine as opaque errors from container and cluster
//! tooling, so classification works on the rendered error text. Two
//! questions are answered here:
//!
//! - [`ErrorCategory::categorize`]: which coarse bucket does this failure
//!   belong to? Used for fallback conditions, history and logs.
//! - [`RetryRules::is_retryable`]: given a policy's allow/deny lists and
//!   structured conditions, should the engine try again?
//!
//! All matching is case-sensitive substring matching unless a condition
//! explicitly asks for equality or a regular expression.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Substrings that mark an error as terminal when no policy rule applies.
pub const KNOWN_TERMINAL_PATTERNS: &[&str] = &[
    "invalid argument",
    "bad request",
    "unauthorized",
    "forbidden",
    "not found",
    "conflict",
    "gone",
    "unsupported",
];

/// Coarse failure buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    Permission,
    NotFound,
    Auth,
    ServerError,
    RateLimit,
    Unknown,
}

impl_label_conversions!(ErrorCategory {
    Timeout => "timeout",
    Network => "network",
    Permission => "permission",
    NotFound => "not_found",
    Auth => "auth",
    ServerError => "server_error",
    RateLimit => "rate_limit",
    Unknown => "unknown",
});

impl ErrorCategory {
    /// Probe order matters: "network timeout" is a timeout.
    const PROBES: &'static [(&'static str, Self)] = &[
        ("timeout", Self::Timeout),
        ("network", Self::Network),
        ("permission", Self::Permission),
        ("not found", Self::NotFound),
        ("unauthorized", Self::Auth),
        ("server error", Self::ServerError),
        ("rate limit", Self::RateLimit),
    ];

    /// Classify a rendered error message.
    pub fn categorize(message: &str) -> Self {
        Self::PROBES
            .iter()
            .find(|(needle, _)| message.contains(needle))
            .map_or(Self::Unknown, |(_, category)| *category)
    }
}

/// How a [`RetryCondition`] compares its pattern to the error text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    #[default]
    Contains,
    Equals,
    Regex,
}

/// Structured retry condition evaluated against the error text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCondition {
    pub pattern: String,
    #[serde(default)]
    pub operator: MatchOperator,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl RetryCondition {
    /// Condition that matches when the error text contains `pattern`
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), operator: MatchOperator::Contains, description: String::new() }
    }

    /// Condition that matches when the error text equals `pattern`
    pub fn equals(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), operator: MatchOperator::Equals, description: String::new() }
    }

    /// Condition that matches when the error text matches the regex `pattern`
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), operator: MatchOperator::Regex, description: String::new() }
    }

    /// Attach a human readable description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Evaluate the condition. An invalid regex never matches.
    pub fn matches(&self, message: &str) -> bool {
        match self.operator {
            MatchOperator::Contains => message.contains(&self.pattern),
            MatchOperator::Equals => message == self.pattern,
            MatchOperator::Regex => match Regex::new(&self.pattern) {
                Ok(re) => re.is_match(message),
                Err(e) => {
                    warn!(pattern = %self.pattern, error = %e, "Ignoring invalid retry condition regex");
                    false
                }
            },
        }
    }
}

/// Borrowed view of a policy's retryability rules
#[derive(Debug, Clone, Copy)]
pub struct RetryRules<'a> {
    pub retryable: &'a [String],
    pub non_retryable: &'a [String],
    pub conditions: &'a [RetryCondition],
}

impl<'a> RetryRules<'a> {
    /// Build a rule view over a policy's pattern lists
    pub const fn new(
        retryable: &'a [String],
        non_retryable: &'a [String],
        conditions: &'a [RetryCondition],
    ) -> Self {
        Self { retryable, non_retryable, conditions }
    }

    /// Decide whether a failure with this message should be retried.
    ///
    /// 1. Any non-retryable pattern match stops retries.
    /// 2. A non-empty retryable list must be matched.
    /// 3. Any matching structured condition allows a retry.
    /// 4. Otherwise the error is retryable unless it looks terminal.
    pub fn is_retryable(&self, message: &str) -> bool {
        if self.non_retryable.iter().any(|p| message.contains(p.as_str())) {
            return false;
        }

        if !self.retryable.is_empty() {
            return self.retryable.iter().any(|p| message.contains(p.as_str()));
        }

        if self.conditions.iter().any(|c| c.matches(message)) {
            return true;
        }

        !KNOWN_TERMINAL_PATTERNS.iter().any(|p| message.contains(p))
    }
}
