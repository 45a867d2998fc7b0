//! Wall-clock source for tick timestamps.
//!
//! [`Clock`] anchors a wall-clock reading to a [`tokio::time::Instant`] and
//! advances with the runtime's monotonic clock. Timestamps it hands out never
//! move backwards within a process, and under a paused test runtime they
//! follow virtual time, so timer-driven tests see consistent
//! `last_server_timestamp` values.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
}

impl Clock {
    /// Anchors the clock to the current system time.
    #[must_use]
    pub fn system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchors the clock so that `now()` currently reads `wall`.
    #[must_use]
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall: wall,
            anchor_instant: Instant::now(),
        }
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor_instant.elapsed()).unwrap_or(TimeDelta::MAX);
        self.anchor_wall
            .checked_add_signed(elapsed)
            .unwrap_or(self.anchor_wall)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
