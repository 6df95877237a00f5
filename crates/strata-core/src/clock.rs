//! Simulation clock owned by the coordinator.
//!
//! The clock is the single source of temporal state for one simulation.
//! The coordinator advances it once per coordinator tick; workers read it
//! when they build the [`TickContext`] handed to tasks, so tasks never
//! reach for a process-wide global.
//!
//! # Design Principles
//!
//! - All temporal derivations use checked or saturating arithmetic.
//! - Planet age is computed from the tick counter, never stored on its own.
//!
//! [`TickContext`]: crate::task::TickContext

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ClockConfig;

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Invalid clock configuration (e.g. zero years per tick).
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Coordinator tick counter with derived planet age.
///
/// Shared between the coordinator (writer) and every worker (readers)
/// through the [`Surface`](crate::surface::Surface).
#[derive(Debug)]
pub struct SimClock {
    /// Coordinator ticks elapsed (0 before the first tick).
    tick: AtomicU64,

    /// Simulated years per coordinator tick.
    years_per_tick: u64,
}

impl SimClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `years_per_tick` is 0.
    pub fn new(config: &ClockConfig) -> Result<Self, ClockError> {
        Self::from_parts(0, config.years_per_tick)
    }

    /// Create a clock from explicit parameters (useful for tests and
    /// restoring a run).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `years_per_tick` is 0.
    pub fn from_parts(tick: u64, years_per_tick: u64) -> Result<Self, ClockError> {
        if years_per_tick == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "years_per_tick must be at least 1".to_owned(),
            });
        }
        Ok(Self {
            tick: AtomicU64::new(tick),
            years_per_tick,
        })
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&self) -> Result<u64, ClockError> {
        let previous = self
            .tick
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| t.checked_add(1))
            .map_err(|_current| ClockError::TickOverflow)?;
        previous.checked_add(1).ok_or(ClockError::TickOverflow)
    }

    /// Current tick number.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Configured years per tick.
    pub const fn years_per_tick(&self) -> u64 {
        self.years_per_tick
    }

    /// Simulated planet age in years, saturating at `u64::MAX`.
    pub fn planet_age(&self) -> u64 {
        self.tick().saturating_mul(self.years_per_tick)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_clock(years_per_tick: u64) -> SimClock {
        SimClock::new(&ClockConfig { years_per_tick }).unwrap()
    }

    #[test]
    fn clock_starts_at_tick_zero() {
        let clock = make_clock(1000);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.planet_age(), 0);
    }

    #[test]
    fn clock_advances() {
        let clock = make_clock(1000);
        assert_eq!(clock.advance().unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 2);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.planet_age(), 2000);
    }

    #[test]
    fn invalid_config_zero_years_per_tick() {
        let result = SimClock::new(&ClockConfig { years_per_tick: 0 });
        assert!(matches!(result, Err(ClockError::InvalidConfig { .. })));
    }

    #[test]
    fn advance_reports_overflow() {
        let clock = SimClock::from_parts(u64::MAX, 1).unwrap();
        assert_eq!(clock.advance(), Err(ClockError::TickOverflow));
        assert_eq!(clock.tick(), u64::MAX);
    }

    #[test]
    fn planet_age_saturates() {
        let clock = SimClock::from_parts(u64::MAX / 2, 4).unwrap();
        assert_eq!(clock.planet_age(), u64::MAX);
    }
}
