//! Wall-clock abstraction.
//!
//! The credential cache reads the time through [`Clock`] so tests can move
//! time forward past an expiry without sleeping.
//!
//! ```ignore
//! use keyward_common::{Clock, MockClock};
//! use std::time::Duration;
//!
//! let clock = MockClock::default();
//! let t0 = clock.now();
//! clock.advance(Duration::from_secs(60));
//! assert_eq!((clock.now() - t0).num_seconds(), 60);
//! ```

use chrono::{DateTime, Utc};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-support"))]
mod mock {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use parking_lot::Mutex;

    use super::Clock;

    /// Time only moves when [`advance`](MockClock::advance) or
    /// [`set`](MockClock::set) is called. Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Starts the clock at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, duration: Duration) {
            let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
            let mut current = self.current.lock();
            *current = current.checked_add_signed(delta).unwrap_or(*current);
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.current.lock() = now;
        }
    }

    impl Default for MockClock {
        /// Starts at 2025-01-15 12:00:00 UTC.
        fn default() -> Self {
            let start = Utc
                .with_ymd_and_hms(2025, 1, 15, 12, 0, 0)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH);
            Self::new(start)
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.current.lock()
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockClock;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::default();
        let start = clock.now();

        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }

    #[test]
    fn test_mock_clock_clone_shares_state() {
        let clock = MockClock::default();
        let clone = clock.clone();
        let start = clock.now();

        clone.advance(Duration::from_secs(5));
        assert_eq!((clock.now() - start).num_seconds(), 5);
    }

    #[test]
    fn test_mock_clock_set() {
        let clock = MockClock::default();
        let target = DateTime::UNIX_EPOCH;

        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
