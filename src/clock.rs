//! Real-time cadence helper.
use std::time::{Duration, Instant};

use crate::constants::*;

/// Frequency in hertz (per second).
#[derive(Debug, Default, Clone, Copy)]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Tracks a fixed real-time interval for the host driving the 60 Hz timer
/// tick, decoupled from instruction throughput.
///
/// It is designed for a polling host loop: call [`Clock::tick`] as often as
/// convenient; it reports `true` only when the interval has elapsed.
pub struct Clock {
    last: Instant,
    interval: Duration,
}

impl Clock {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Instant::now(),
            interval,
        }
    }

    pub fn from_hz(freq: Hz) -> Self {
        Self::new(freq.into())
    }

    /// Set the clock state back to zero.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// True when at least one interval has elapsed since the last report.
    pub fn tick(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            // Reset back to zero, rather than trying to catch up.
            //
            // If the VM was paused for debugging, and a large amount of
            // time has elapsed until it is resumed, it should simply
            // continue at the next cycle running at its usual speed.
            self.reset();
            true
        } else {
            false
        }
    }
}
