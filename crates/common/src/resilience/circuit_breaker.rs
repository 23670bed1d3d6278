//! Circuit breaker state machine
//!
//! A breaker is a cyclic three-state machine:
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ---------------------------------> OPEN
//!     ^                                        |  now - last_failure > timeout
//!     | successes >= success_threshold         v
//!     +------------------------------------ HALF_OPEN
//!                  any failure: back to OPEN
//! ```
//!
//! All reads and transitions of one breaker are serialized by a single
//! mutex. The breaker itself never runs the protected call; callers ask
//! [`CircuitBreaker::can_execute`] first and then report the outcome with
//! [`CircuitBreaker::record_success`] or [`CircuitBreaker::record_failure`].
//! A half-open admission that ends without an outcome must be handed back
//! with [`CircuitBreaker::release`].

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{CommonError, CommonResult};
use crate::utils::serde::{duration_millis, option_duration_millis};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of successes needed to close the circuit from half-open
    pub success_threshold: u32,
    /// Time to wait after the last failure before probing again
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Maximum number of concurrent probes admitted while half-open
    pub half_open_max_calls: u32,
    /// Failures further apart than this do not accumulate
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub monitoring_window: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            monitoring_window: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::config_field(
                "failure_threshold",
                "must be greater than 0",
            ));
        }

        if self.success_threshold == 0 {
            return Err(CommonError::config_field(
                "success_threshold",
                "must be greater than 0",
            ));
        }

        if self.half_open_max_calls == 0 {
            return Err(CommonError::config_field(
                "half_open_max_calls",
                "must be greater than 0",
            ));
        }

        if self.monitoring_window.is_some_and(|w| w.is_zero()) {
            return Err(CommonError::config_field(
                "monitoring_window",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn monitoring_window(mut self, window: Duration) -> Self {
        self.config.monitoring_window = Some(window);
        self
    }

    pub fn build(self) -> CommonResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker, suitable for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_in_flight: u32,
    /// Number of transitions into `Open` since creation or the last reset
    pub trips: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
    pub config: CircuitBreakerConfig,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    trips: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_state_change_at: DateTime<Utc>,
}

impl Inner {
    fn transition(&mut self, to: CircuitState, at: DateTime<Utc>) {
        self.state = to;
        self.last_state_change_at = at;
    }
}

/// Named circuit breaker guarding one policy's operations
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> CommonResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> CommonResult<Self> {
        config.validate()?;

        let created = clock.utc_now();
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                trips: 0,
                last_failure: None,
                last_failure_at: None,
                last_success_at: None,
                last_state_change_at: created,
            }),
            clock,
        })
    }

    /// Breaker name (the policy it guards)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if the circuit breaker admits a call.
    ///
    /// While open, the first check made strictly after `timeout` has passed
    /// since the last failure moves the breaker to half-open and is admitted
    /// as a probe. Half-open admissions are capped at `half_open_max_calls`
    /// outstanding probes.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) > self.config.timeout);
                if !cooled_down {
                    return false;
                }

                inner.transition(CircuitState::HalfOpen, self.clock.utc_now());
                inner.success_count = 0;
                inner.half_open_in_flight = 1;
                info!(breaker = %self.name, "Circuit breaker half-open, probing recovery");
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    debug!(breaker = %self.name, "Half-open probe limit reached");
                    false
                }
            }
        }
    }

    /// Record a successful call. Returns the new state if it changed.
    pub fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        let now = self.clock.utc_now();
        inner.last_success_at = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count < self.config.success_threshold {
                    return None;
                }

                let successes = inner.success_count;
                inner.transition(CircuitState::Closed, now);
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_in_flight = 0;
                info!(
                    breaker = %self.name,
                    success_count = successes,
                    "Circuit breaker closed after {} successes",
                    successes
                );
                Some(CircuitState::Closed)
            }
            CircuitState::Open => {
                // A call admitted before the breaker opened finished late.
                debug!(breaker = %self.name, "Ignoring success while circuit is open");
                None
            }
        }
    }

    /// Record a failed call. Returns the new state if it changed.
    pub fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let now_utc = self.clock.utc_now();

        if inner.state == CircuitState::Closed {
            if let (Some(window), Some(previous)) = (self.config.monitoring_window, inner.last_failure)
            {
                if now.saturating_duration_since(previous) > window {
                    inner.failure_count = 0;
                }
            }
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.last_failure_at = Some(now_utc);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count < self.config.failure_threshold {
                    return None;
                }
                inner.transition(CircuitState::Open, now_utc);
                inner.trips += 1;
                warn!(
                    breaker = %self.name,
                    failure_count = inner.failure_count,
                    "Circuit breaker opened after {} failures",
                    inner.failure_count
                );
                Some(CircuitState::Open)
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now_utc);
                inner.success_count = 0;
                inner.half_open_in_flight = 0;
                inner.trips += 1;
                warn!(breaker = %self.name, "Circuit breaker opened due to failure in half-open state");
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Hand back a half-open admission whose call produced no outcome
    /// (cancelled, or absorbed by a fallback).
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Force the breaker back to closed and clear its counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.transition(CircuitState::Closed, self.clock.utc_now());
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.last_failure = None;
        info!(breaker = %self.name, previous = %previous, "Circuit breaker manually reset");
    }

    /// Current state without triggering the open to half-open transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of counters and timestamps
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_in_flight: inner.half_open_in_flight,
            trips: inner.trips,
            last_failure: inner.last_failure_at,
            last_success: inner.last_success_at,
            last_state_change: inner.last_state_change_at,
            config: self.config.clone(),
        }
    }
}
