//! Time sources for idle bookkeeping.

use std::fmt;
use std::time::Instant;

/// A source of the current time, used to stamp idle connections and decide when they
/// have expired.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The system monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::manual::ManualClock;

#[cfg(any(test, feature = "mock"))]
mod manual {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::Clock;

    /// A clock which only moves when told to.
    ///
    /// Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<Instant>>,
    }

    impl ManualClock {
        /// Create a clock frozen at the current instant.
        pub fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(Instant::now())),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, duration: Duration) {
            *self.now.lock() += duration;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn manual_clock_advances() {
            let clock = ManualClock::new();
            let other = clock.clone();
            let start = clock.now();

            assert_eq!(clock.now(), start);
            other.advance(Duration::from_secs(2));
            assert_eq!(clock.now(), start + Duration::from_secs(2));
        }
    }
}
