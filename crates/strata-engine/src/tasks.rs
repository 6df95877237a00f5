//! Demo terrain tasks registered by the engine binary.
//!
//! - [`PassCounter`] is registered once and shared by every worker, so its
//!   counters are atomics.
//! - [`ThermalErosion`] and [`Rainfall`] are built per worker by factories;
//!   each instance only ever runs on its own worker thread.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::{Delay, Surface, Task, TaskError, TickContext, WorkerId};
use strata_grid::{Coord, Region};
use tracing::debug;

use crate::terrain::Terrain;

/// Slope (metres per cell) above which material slides downhill.
const TALUS: f64 = 12.0;

/// Fraction of the excess slope moved per transfer.
const SLIDE_RATE: f64 = 0.25;

/// Counts worker passes and visited cells across the whole pool.
#[derive(Debug, Default)]
pub struct PassCounter {
    passes: AtomicU64,
    cells: AtomicU64,
}

impl PassCounter {
    /// Completed region passes, summed over workers.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Cells visited, summed over workers.
    pub fn cells(&self) -> u64 {
        self.cells.load(Ordering::Acquire)
    }
}

impl Task<Terrain> for PassCounter {
    fn name(&self) -> &str {
        "pass-counter"
    }

    fn check(&self, _ctx: &TickContext) -> bool {
        true
    }

    fn perform(
        &self,
        _surface: &Surface<Terrain>,
        _ctx: &TickContext,
        _x: usize,
        _y: usize,
    ) -> Result<(), TaskError> {
        self.cells.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn after(&self, _surface: &Surface<Terrain>, _ctx: &TickContext) -> Result<(), TaskError> {
        self.passes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Moves material from a cell to its lower right and lower neighbours when
/// the slope exceeds [`TALUS`].
///
/// Each cell and its neighbours are locked together as one batch, which
/// may reach into the next worker's region at region edges.
#[derive(Debug)]
pub struct ThermalErosion {
    worker: WorkerId,
    pacing: Delay,
    transfers: AtomicU64,
}

impl ThermalErosion {
    /// Erosion for `worker`, running on every `every`-th tick.
    pub const fn new(worker: WorkerId, every: u64) -> Self {
        Self {
            worker,
            pacing: Delay::new(every),
            transfers: AtomicU64::new(0),
        }
    }

    /// Slides recorded since the start of the current pass.
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Acquire)
    }
}

impl Task<Terrain> for ThermalErosion {
    fn name(&self) -> &str {
        "thermal-erosion"
    }

    fn check(&self, _ctx: &TickContext) -> bool {
        self.pacing.ready()
    }

    fn before(&self, _surface: &Surface<Terrain>, _ctx: &TickContext) -> Result<(), TaskError> {
        self.transfers.store(0, Ordering::Release);
        Ok(())
    }

    fn perform(
        &self,
        surface: &Surface<Terrain>,
        _ctx: &TickContext,
        x: usize,
        y: usize,
    ) -> Result<(), TaskError> {
        let width = surface.width();
        let mut coords = vec![Coord::new(x, y)];
        if let Some(right) = x.checked_add(1).filter(|&r| r < width) {
            coords.push(Coord::new(right, y));
        }
        if let Some(below) = y.checked_add(1).filter(|&b| b < width) {
            coords.push(Coord::new(x, below));
        }

        // Guards come back in ascending index order, so the centre cell
        // (lowest index of the three) is first.
        let guards = surface.wait_for_cells(&coords)?;
        let mut values: Vec<Terrain> = guards.iter().map(|g| *g.value()).collect();

        let mut slid: u64 = 0;
        if let Some((centre, neighbours)) = values.split_first_mut() {
            for neighbour in neighbours {
                let slope = centre.elevation - neighbour.elevation;
                if slope > TALUS {
                    let moved = (slope - TALUS) * SLIDE_RATE;
                    centre.elevation -= moved;
                    neighbour.elevation += moved;
                    neighbour.sediment += moved;
                    slid = slid.saturating_add(1);
                }
            }
        }

        for (guard, value) in guards.into_iter().zip(values) {
            surface.release(guard, value);
        }
        self.transfers.fetch_add(slid, Ordering::AcqRel);
        Ok(())
    }

    fn after(&self, _surface: &Surface<Terrain>, ctx: &TickContext) -> Result<(), TaskError> {
        debug!(
            worker = %self.worker,
            tick = ctx.worker_tick,
            transfers = self.transfers(),
            "Erosion pass complete"
        );
        Ok(())
    }
}

/// Drops rain on random cells of the worker's region and lets standing
/// water wear the surface down.
///
/// The random stream is private to the worker, seeded from the world seed
/// and the worker index.
#[derive(Debug)]
pub struct Rainfall {
    rng: Mutex<StdRng>,
    chance: f64,
}

impl Rainfall {
    /// Rainfall for `worker`; each cell is hit with probability `chance`.
    pub fn new(seed: u64, worker: WorkerId, chance: f64) -> Self {
        let index = u64::try_from(worker.index()).unwrap_or(u64::MAX);
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed ^ index.rotate_left(32))),
            chance: chance.clamp(0.0, 1.0),
        }
    }

    /// Factory closure for [`SurfaceMapBuilder::task_factory`].
    ///
    /// [`SurfaceMapBuilder::task_factory`]: strata_core::SurfaceMapBuilder::task_factory
    pub fn for_worker(
        seed: u64,
        chance: f64,
    ) -> impl Fn(WorkerId, &Region) -> Self + Send + Sync + 'static {
        move |worker, _region| Self::new(seed, worker, chance)
    }
}

impl Task<Terrain> for Rainfall {
    fn name(&self) -> &str {
        "rainfall"
    }

    fn check(&self, ctx: &TickContext) -> bool {
        !ctx.region.is_empty()
    }

    fn perform(
        &self,
        surface: &Surface<Terrain>,
        _ctx: &TickContext,
        x: usize,
        y: usize,
    ) -> Result<(), TaskError> {
        let rain = {
            let mut rng = self.rng.lock();
            if !rng.random_bool(self.chance) {
                return Ok(());
            }
            rng.random_range(0.5..5.0)
        };

        let Some(guard) = surface.wait_cell_at(x, y)? else {
            return Err(TaskError::failed(format!("cell ({x}, {y}) missing")));
        };
        let mut cell = *guard.value();
        cell.water += rain;
        let worn = (cell.water * 0.001).min(cell.sediment);
        cell.sediment -= worn;
        cell.elevation -= worn;
        surface.release(guard, cell);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Duration;

    use strata_core::SimClock;
    use strata_grid::Grid;

    use super::*;

    fn surface(cells: &[f64], width: usize) -> Surface<Terrain> {
        let grid = Grid::build(width, |x, y| {
            Terrain::at(cells.get(y * width + x).copied().unwrap_or_default())
        })
        .unwrap();
        Surface::new(
            grid,
            Duration::from_millis(100),
            SimClock::from_parts(0, 1).unwrap(),
        )
    }

    fn ctx(region: Region) -> TickContext {
        TickContext {
            worker: WorkerId::new(0),
            worker_tick: 1,
            sim_tick: 0,
            planet_age: 0,
            region,
        }
    }

    #[test]
    fn erosion_moves_material_downhill() {
        let s = surface(&[100.0, 0.0, 0.0, 0.0], 2);
        let region = Region::new(0, 2, 0, 2).unwrap();
        let erosion = ThermalErosion::new(WorkerId::new(0), 1);

        erosion.perform(&s, &ctx(region), 0, 0).unwrap();
        assert_eq!(erosion.transfers(), 2);

        let centre = *s.try_cell_at(0, 0).unwrap().value();
        let right = *s.try_cell_at(1, 0).unwrap().value();
        assert!(centre.elevation < 100.0);
        assert!(right.elevation > 0.0);
        assert!(right.sediment > 0.0);
        // Diagonal neighbour is never touched.
        assert!(s.try_cell_at(1, 1).unwrap().value().elevation.abs() < f64::EPSILON);
    }

    #[test]
    fn erosion_at_the_edge_only_locks_existing_cells() {
        let s = surface(&[0.0, 0.0, 0.0, 50.0], 2);
        let region = Region::new(0, 2, 0, 2).unwrap();
        let erosion = ThermalErosion::new(WorkerId::new(0), 1);
        erosion.perform(&s, &ctx(region), 1, 1).unwrap();
        assert_eq!(erosion.transfers(), 0);
    }

    #[test]
    fn rainfall_with_certain_chance_wets_the_cell() {
        let s = surface(&[10.0], 1);
        let rain = Rainfall::new(3, WorkerId::new(0), 1.0);
        let region = Region::new(0, 1, 0, 1).unwrap();
        rain.perform(&s, &ctx(region), 0, 0).unwrap();
        assert!(s.try_cell_at(0, 0).unwrap().value().water >= 0.5);
    }

    #[test]
    fn pass_counter_is_shared_across_calls() {
        let s = surface(&[0.0; 4], 2);
        let counter = PassCounter::default();
        let region = Region::new(0, 2, 0, 2).unwrap();
        for c in region.coords() {
            counter.perform(&s, &ctx(region), c.x, c.y).unwrap();
        }
        counter.after(&s, &ctx(region)).unwrap();
        assert_eq!(counter.cells(), 4);
        assert_eq!(counter.passes(), 1);
    }
}
