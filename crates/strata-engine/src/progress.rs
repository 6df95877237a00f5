//! Tick callback that logs coordinator progress.
//!
//! Every `every` coordinator ticks the callback logs the tick, planet age,
//! and a render sample of the grid's centre cell. The sample is read with
//! a non-blocking acquire, so a busy cell is simply skipped.

use strata_core::{CoordinatorTick, SurfaceMap, TickCallback};
use strata_grid::Datum;
use tracing::{debug, info};

use crate::terrain::Terrain;

/// Logs a progress line every `every` coordinator ticks.
#[derive(Debug)]
pub struct ProgressCallback {
    every: u64,
    samples: u64,
    skipped: u64,
}

impl ProgressCallback {
    /// Log every `every`-th tick. Zero behaves as 1.
    pub const fn new(every: u64) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            samples: 0,
            skipped: 0,
        }
    }

    /// Centre-cell samples that found the cell held by a worker.
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Centre-cell samples taken.
    pub const fn samples(&self) -> u64 {
        self.samples
    }
}

impl TickCallback<Terrain> for ProgressCallback {
    fn on_tick(&mut self, tick: &CoordinatorTick, map: &SurfaceMap<Terrain>) {
        if tick.tick.checked_rem(self.every) != Some(0) {
            return;
        }

        let centre = map.width().checked_div(2).unwrap_or_default();
        self.samples = self.samples.saturating_add(1);
        let Some(settings) = map.render_settings(centre, centre) else {
            self.skipped = self.skipped.saturating_add(1);
            debug!(tick = tick.tick, x = centre, y = centre, "Sample cell busy");
            return;
        };

        let elevation = settings.iter().find_map(|d| match d {
            Datum::Scalar(v) => Some(*v),
            _ => None,
        });
        let band = settings.iter().find_map(|d| match d {
            Datum::Label(l) => Some(l.as_str()),
            _ => None,
        });

        info!(
            tick = tick.tick,
            planet_age = tick.planet_age,
            live_workers = tick.live_workers,
            average_tick_ms = tick.average_tick_millis,
            sample_elevation = elevation,
            sample_band = band,
            "Progress"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strata_core::{SurfaceConfig, SurfaceMapBuilder};

    use super::*;

    fn map() -> SurfaceMap<Terrain> {
        let mut config = SurfaceConfig::default();
        config.grid.width = 4;
        config.grid.thread_division = 2;
        SurfaceMapBuilder::<Terrain>::new(config)
            .build(|_, _| Terrain::at(300.0))
            .unwrap()
    }

    fn tick(n: u64) -> CoordinatorTick {
        CoordinatorTick {
            tick: n,
            planet_age: n,
            average_tick_millis: 0,
            live_workers: 4,
        }
    }

    #[test]
    fn samples_only_on_period() {
        let map = map();
        let mut cb = ProgressCallback::new(5);
        for n in 1..=10 {
            cb.on_tick(&tick(n), &map);
        }
        assert_eq!(cb.samples(), 2);
        assert_eq!(cb.skipped(), 0);
    }

    #[test]
    fn held_centre_cell_is_skipped() {
        let map = map();
        let mut cb = ProgressCallback::new(1);
        let guard = map.try_cell_at(2, 2).unwrap();
        cb.on_tick(&tick(1), &map);
        guard.release_unchanged();
        assert_eq!(cb.skipped(), 1);
    }
}
