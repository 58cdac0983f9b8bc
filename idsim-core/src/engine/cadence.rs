//! When the optimizer runs, and how long a run takes in simulated time.

use std::fmt;
use std::time::Duration;

use crate::domain::units::MS_PER_MINUTE;
use crate::domain::Timestamp;

/// Re-solve policy.
///
/// A solve never starts before the previous run's decision became visible.
pub trait SolveCadence: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn first_solve(&self, start: Timestamp) -> Timestamp;

    /// Start of the next solve. `None` means wait for a market event.
    fn next_solve(&self, last_start: Timestamp, visible_at: Timestamp) -> Option<Timestamp>;

    fn triggered_by_events(&self) -> bool {
        false
    }
}

/// Solves on a fixed grid `anchor + k · interval`, skipping slots that fall
/// before the previous decision became visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval {
    pub anchor: Timestamp,
    pub interval: i64,
}

impl SolveCadence for FixedInterval {
    fn name(&self) -> &'static str {
        "fixed-interval"
    }

    fn first_solve(&self, start: Timestamp) -> Timestamp {
        start.max(self.anchor)
    }

    fn next_solve(&self, last_start: Timestamp, visible_at: Timestamp) -> Option<Timestamp> {
        let floor = (last_start + 1).max(visible_at);
        let k = (floor - self.anchor + self.interval - 1).div_euclid(self.interval);
        Some(self.anchor + k.max(0) * self.interval)
    }
}

/// Solves again on the first book change or hour settlement after the
/// previous decision became visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventDriven;

impl SolveCadence for EventDriven {
    fn name(&self) -> &'static str {
        "event-driven"
    }

    fn first_solve(&self, start: Timestamp) -> Timestamp {
        start
    }

    fn next_solve(&self, _last_start: Timestamp, _visible_at: Timestamp) -> Option<Timestamp> {
        None
    }

    fn triggered_by_events(&self) -> bool {
        true
    }
}

/// `dp_freq` in minutes; zero selects the event-driven cadence.
pub fn cadence_for(dp_freq_minutes: f64, start: Timestamp) -> Box<dyn SolveCadence> {
    let interval = (dp_freq_minutes * MS_PER_MINUTE as f64).round() as i64;
    if interval <= 0 {
        Box::new(EventDriven)
    } else {
        Box::new(FixedInterval {
            anchor: start,
            interval,
        })
    }
}

/// Simulated duration of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveDuration {
    Fixed(i64),
    /// Use the wall-clock time the solve actually took.
    Measured,
}

impl SolveDuration {
    /// `-1` selects the measured duration.
    pub fn from_param(ms: i64) -> Self {
        if ms < 0 {
            SolveDuration::Measured
        } else {
            SolveDuration::Fixed(ms)
        }
    }

    pub fn resolve(&self, measured: Duration) -> i64 {
        match self {
            SolveDuration::Fixed(ms) => *ms,
            SolveDuration::Measured => measured.as_millis().min(i64::MAX as u128) as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_skips_to_the_next_free_slot() {
        let cadence = FixedInterval {
            anchor: 1_000,
            interval: 100,
        };
        assert_eq!(cadence.first_solve(1_000), 1_000);
        assert_eq!(cadence.next_solve(1_000, 1_000), Some(1_100));
        assert_eq!(cadence.next_solve(1_000, 1_050), Some(1_100));
        assert_eq!(cadence.next_solve(1_000, 1_100), Some(1_100));
        assert_eq!(cadence.next_solve(1_000, 1_250), Some(1_300));
    }

    #[test]
    fn zero_frequency_is_event_driven() {
        let cadence = cadence_for(0.0, 0);
        assert!(cadence.triggered_by_events());
        assert_eq!(cadence.next_solve(0, 10), None);
        let fixed = cadence_for(15.0, 0);
        assert_eq!(fixed.name(), "fixed-interval");
        assert_eq!(fixed.next_solve(0, 0), Some(15 * MS_PER_MINUTE));
    }

    #[test]
    fn solve_duration_modes() {
        assert_eq!(SolveDuration::from_param(-1), SolveDuration::Measured);
        assert_eq!(SolveDuration::from_param(250).resolve(Duration::from_secs(9)), 250);
        assert_eq!(
            SolveDuration::Measured.resolve(Duration::from_millis(42)),
            42
        );
    }
}
