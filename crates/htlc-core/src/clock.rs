//! Time source for expiry decisions.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::HtlcError;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as unix seconds
    fn now_secs(&self) -> u64 {
        u64::try_from(self.now().timestamp()).unwrap_or_default()
    }
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock that only moves when told to
#[derive(Clone, Debug)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Advance simulated time by seconds, returning the new time.
    ///
    /// A step outside the representable range leaves the clock where it was.
    pub fn advance(&self, seconds: i64) -> Result<DateTime<Utc>, HtlcError> {
        let out_of_range =
            || HtlcError::InvalidInput(format!("cannot advance the clock by {seconds}s"));
        let step = TimeDelta::try_seconds(seconds).ok_or_else(out_of_range)?;

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let next = current.checked_add_signed(step).ok_or_else(out_of_range)?;
        *current = next;
        Ok(next)
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_secs(), 1_700_000_000);

        clock.advance(1_001).unwrap();
        assert_eq!(clock.now_secs(), 1_700_001_001);

        // Clones share the same timeline
        let other = clock.clone();
        other.advance(9).unwrap();
        assert_eq!(clock.now_secs(), 1_700_001_010);
    }

    #[test]
    fn test_manual_clock_rejects_out_of_range_step() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        assert!(matches!(clock.advance(i64::MAX), Err(HtlcError::InvalidInput(_))));
        // In range for the delta, past the end of the calendar
        assert!(matches!(
            clock.advance(i64::MAX / 1_000),
            Err(HtlcError::InvalidInput(_))
        ));
        assert_eq!(clock.now_secs(), 1_700_000_000);
    }
}
