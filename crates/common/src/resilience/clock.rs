//! Time abstraction for testability
//!
//! Circuit breakers and the adaptive learner read time through [`Clock`] so
//! production code uses the real monotonic clock while tests drive time
//! forward explicitly with [`MockClock`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis =
            self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }

    /// Wall-clock time as a UTC timestamp, for status snapshots
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }
}

/// Shared, type-erased clock handle used by the engine
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed counter, so a test can hand one clone to
/// the component under test and advance time through another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_start: SystemTime::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the clock abstraction.

    use super::*;

    /// Validates the system clock now scenario.
    ///
    /// Assertions:
    /// - Ensures `now2 >= now1` evaluates to true.
    #[test]
    fn test_system_clock_now() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();
        assert!(now2 >= now1, "System clock should advance");
    }

    /// Validates `MockClock::new` behavior for the mock clock advance scenario.
    ///
    /// Assertions:
    /// - Confirms `after.duration_since(start)` equals
    ///   `Duration::from_secs(5)`.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
    }

    /// Validates `MockClock::set_elapsed` and the millisecond helper.
    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();
        clock.set_elapsed(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));

        clock.advance_millis(250);
        assert_eq!(clock.elapsed(), Duration::from_millis(10_250));
    }

    /// Validates that clones share one timeline.
    ///
    /// Assertions:
    /// - Confirms advancing either clone is visible through both.
    #[test]
    fn test_mock_clock_clone_shares_time() {
        let clock1 = MockClock::new();
        clock1.advance(Duration::from_secs(10));

        let clock2 = clock1.clone();
        clock2.advance(Duration::from_secs(5));
        assert_eq!(clock1.elapsed(), Duration::from_secs(15));
        assert_eq!(clock2.elapsed(), Duration::from_secs(15));
    }

    /// Validates that the wall clock moves with the mock timeline.
    #[test]
    fn test_mock_clock_utc_now_advances() {
        let clock = MockClock::new();
        let before = clock.utc_now();
        clock.advance(Duration::from_secs(60));
        let after = clock.utc_now();
        assert_eq!((after - before).num_seconds(), 60);
    }

    /// Validates the blanket `Arc` implementation through a `SharedClock`.
    #[test]
    fn test_shared_clock_delegates() {
        let mock = MockClock::new();
        let shared: SharedClock = Arc::new(mock.clone());
        let start = shared.now();
        mock.advance(Duration::from_millis(40));
        assert_eq!(shared.now().duration_since(start), Duration::from_millis(40));
    }
}
