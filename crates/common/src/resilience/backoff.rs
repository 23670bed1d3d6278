//! Backoff delay calculation
//!
//! Attempts are 1-indexed: the delay computed for attempt `n` is the wait
//! after the `n`-th failure and before attempt `n + 1`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Strategy for growing the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait `base`
    Constant,
    /// `attempt * base`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    #[default]
    Exponential,
    /// `base * attempt^3`
    Cubic,
    /// learned optimal delay times `attempt`, or `attempt * 1s` before
    /// anything has been learned
    Adaptive,
}

impl_label_conversions!(BackoffStrategy {
    Constant => "constant",
    Linear => "linear",
    Exponential => "exponential",
    Cubic => "cubic",
    Adaptive => "adaptive",
});

/// Per-attempt delay used by adaptive backoff before any samples exist
const ADAPTIVE_FALLBACK_UNIT: Duration = Duration::from_secs(1);

/// Delay calculator built from a retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `0.0..=1.0`; `None` disables jitter
    pub jitter: Option<f64>,
}

impl Backoff {
    /// Create a jitter-free calculator
    pub fn new(
        strategy: BackoffStrategy,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self { strategy, base_delay, max_delay, multiplier, jitter: None }
    }

    /// Enable `±range` proportional jitter
    #[must_use]
    pub fn with_jitter(mut self, range: f64) -> Self {
        self.jitter = Some(range);
        self
    }

    /// Deterministic delay for `attempt`, capped at `max_delay`.
    ///
    /// `learned` is the adaptive learner's optimal delay for the operation
    /// and only matters for [`BackoffStrategy::Adaptive`].
    pub fn capped_delay(&self, attempt: u32, learned: Option<Duration>) -> Duration {
        let n = f64::from(attempt.max(1));
        let base = self.base_delay.as_secs_f64();

        let secs = match self.strategy {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base * n,
            BackoffStrategy::Exponential => base * self.multiplier.powf(n - 1.0),
            BackoffStrategy::Cubic => base * n.powi(3),
            BackoffStrategy::Adaptive => {
                learned.unwrap_or(ADAPTIVE_FALLBACK_UNIT).as_secs_f64() * n
            }
        };

        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            // Only overflow and NaN land here; negative inputs are impossible.
            Err(_) => self.max_delay,
        }
    }

    /// Delay for `attempt` with jitter drawn from the thread-local RNG
    pub fn delay(&self, attempt: u32, learned: Option<Duration>) -> Duration {
        self.delay_with_rng(attempt, learned, &mut rand::thread_rng())
    }

    /// Delay for `attempt` with jitter drawn from `rng`.
    ///
    /// The capped delay is perturbed by up to `±delay * range`. A perturbed
    /// value below zero is replaced by `base_delay`.
    pub fn delay_with_rng<R: Rng>(
        &self,
        attempt: u32,
        learned: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let delay = self.capped_delay(attempt, learned);

        let Some(range) = self.jitter.filter(|r| *r > 0.0) else {
            return delay;
        };

        let secs = delay.as_secs_f64();
        let offset = secs * range * rng.gen_range(-1.0..=1.0);
        Duration::try_from_secs_f64(secs + offset).unwrap_or(self.base_delay)
    }
}
