//! Injectable time source.
//!
//! The verifier and rate limiter never call `Utc::now()` directly. Tests
//! drive a [`ManualClock`] instead of sleeping through real windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

/// Converts a configured duration for comparison against timestamp
/// differences. Anything beyond chrono's range saturates.
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Anything that can tell the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now = now
            .checked_add_signed(to_time_delta(by))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jumps to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_shares_state() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let view = clock.clone();

        clock.advance(Duration::from_secs(90));
        assert_eq!(view.now() - start, chrono::Duration::seconds(90));

        view.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn oversized_durations_saturate() {
        assert_eq!(to_time_delta(Duration::from_secs(u64::MAX)), TimeDelta::MAX);
        assert_eq!(to_time_delta(Duration::MAX), TimeDelta::MAX);
        assert_eq!(to_time_delta(Duration::from_millis(1500)), TimeDelta::milliseconds(1500));
    }
}
