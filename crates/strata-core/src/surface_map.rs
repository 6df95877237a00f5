//! The coordinator: grid, workers, clock, and tick pacing under one owner.
//!
//! A [`SurfaceMap`] is assembled by [`SurfaceMapBuilder`] from a validated
//! [`SurfaceConfig`], a list of task registrations, and a cell factory. All
//! configuration errors surface from [`SurfaceMapBuilder::build`], before
//! any worker thread exists.
//!
//! # Design Principles
//!
//! - Registration order is execution order. Shared tasks and per-worker
//!   factories may be interleaved freely.
//! - A shared task is one instance seen by every worker; a factory builds
//!   one private instance per worker at setup.
//! - The coordinator never touches a cell except through the same lock path
//!   workers use.
//! - Teardown is always complete: [`SurfaceMap::shutdown`] (or `Drop`)
//!   kills every worker, cancels pending cell waits, and joins every thread.

use std::sync::{Arc, mpsc};

use serde::Serialize;
use strata_grid::{CellError, CellGuard, CellSlot, Coord, Datum, Grid, Region, RenderSource};
use tracing::{debug, info, warn};

use crate::barrier::TickBarrier;
use crate::clock::SimClock;
use crate::config::SurfaceConfig;
use crate::error::SurfaceError;
use crate::surface::Surface;
use crate::task::{Task, TaskFactory, TaskFault};
use crate::task_manager::TaskManager;
use crate::worker::{Worker, WorkerId, WorkerStats};

enum Registration<T> {
    Shared(Arc<dyn Task<T>>),
    PerWorker(Box<dyn TaskFactory<T>>),
}

/// Collects configuration and task registrations for a [`SurfaceMap`].
pub struct SurfaceMapBuilder<T> {
    config: SurfaceConfig,
    registrations: Vec<Registration<T>>,
}

impl<T> std::fmt::Debug for SurfaceMapBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceMapBuilder")
            .field("config", &self.config)
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

impl<T: 'static> SurfaceMapBuilder<T> {
    /// Start a builder from configuration.
    pub const fn new(config: SurfaceConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
        }
    }

    /// Register one task instance shared by every worker.
    #[must_use]
    pub fn task(mut self, task: Arc<dyn Task<T>>) -> Self {
        self.registrations.push(Registration::Shared(task));
        self
    }

    /// Register a closure that builds one task per worker.
    #[must_use]
    pub fn task_factory<F, K>(self, build: F) -> Self
    where
        F: Fn(WorkerId, &Region) -> K + Send + Sync + 'static,
        K: Task<T> + 'static,
    {
        self.factory(move |id: WorkerId, region: &Region| -> Arc<dyn Task<T>> {
            Arc::new(build(id, region))
        })
    }

    /// Register any [`TaskFactory`] implementation.
    #[must_use]
    pub fn factory(mut self, factory: impl TaskFactory<T> + 'static) -> Self {
        self.registrations
            .push(Registration::PerWorker(Box::new(factory)));
        self
    }

    /// Validate, build the grid and the workers. No thread is started.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::Configuration`] for invalid grid or tiling
    /// parameters and [`SurfaceError::Clock`] for an invalid clock.
    pub fn build<F>(self, cell_factory: F) -> Result<SurfaceMap<T>, SurfaceError>
    where
        F: FnMut(usize, usize) -> T,
    {
        let config = self.config;
        config.validate()?;
        let regions = Region::tile(config.grid.width, config.grid.thread_division)?;
        let clock = SimClock::new(&config.clock)?;
        let grid = Grid::build(config.grid.width, cell_factory)?;
        let surface = Arc::new(Surface::new(grid, config.timing.lock_timeout(), clock));
        let barrier = Arc::new(TickBarrier::new(regions.len()));

        let workers: Vec<Worker<T>> = regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                let id = WorkerId::new(i);
                let mut manager = TaskManager::new(*region);
                for registration in &self.registrations {
                    match registration {
                        Registration::Shared(task) => manager.add_task(Arc::clone(task)),
                        Registration::PerWorker(factory) => {
                            manager.add_task(factory.build(id, region));
                        }
                    }
                }
                let worker = Worker::new(id, manager, Arc::clone(&barrier));
                worker.set_delay(config.timing.worker_delay_ms);
                worker.set_continuous(config.timing.continuous);
                worker.set_fault_policy(config.workers.fault_policy);
                worker
            })
            .collect();

        info!(
            width = config.grid.width,
            workers = workers.len(),
            tasks = self.registrations.len(),
            lock_timeout_ms = config.timing.lock_timeout_ms,
            "Surface map built"
        );

        Ok(SurfaceMap {
            continuous: config.timing.continuous,
            config,
            surface,
            barrier,
            workers,
            regions,
            average_tick_millis: 0,
            started: false,
            shut_down: false,
        })
    }
}

/// Result of one [`SurfaceMap::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorTick {
    /// The new coordinator tick number.
    pub tick: u64,
    /// Planet age after the tick.
    pub planet_age: u64,
    /// Mean of every worker's last tick duration.
    pub average_tick_millis: u64,
    /// Workers whose threads are still running.
    pub live_workers: usize,
}

/// Outcome of tearing the pool down.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Threads joined, faulted or not.
    pub workers_joined: usize,
    /// Faults that stopped fail-fast workers.
    pub faults: Vec<TaskFault>,
    /// Workers whose thread panicked outside the task boundary.
    pub panicked: Vec<WorkerId>,
}

impl ShutdownReport {
    /// Whether every worker exited cleanly.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty() && self.panicked.is_empty()
    }

    /// Turn the first fault or panic into an error.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::WorkerFault`] or [`SurfaceError::WorkerPanicked`].
    pub fn into_result(mut self) -> Result<Self, SurfaceError> {
        if !self.faults.is_empty() {
            let fault = self.faults.swap_remove(0);
            return Err(SurfaceError::WorkerFault(Box::new(fault)));
        }
        if let Some(&worker) = self.panicked.first() {
            return Err(SurfaceError::WorkerPanicked { worker });
        }
        Ok(self)
    }
}

/// Owner of the grid, the worker pool, and the simulation clock.
#[derive(Debug)]
pub struct SurfaceMap<T> {
    config: SurfaceConfig,
    surface: Arc<Surface<T>>,
    barrier: Arc<TickBarrier>,
    workers: Vec<Worker<T>>,
    regions: Vec<Region>,
    average_tick_millis: u64,
    continuous: bool,
    started: bool,
    shut_down: bool,
}

impl<T: Send + 'static> SurfaceMap<T> {
    /// Spawn every worker, paused, and wait until all of them are live.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::AlreadyStarted`] on a second call. If a spawn fails,
    /// the workers already spawned are killed and joined before the error
    /// is returned.
    pub fn start(&mut self) -> Result<(), SurfaceError> {
        if self.started {
            return Err(SurfaceError::AlreadyStarted);
        }
        self.started = true;

        let (ready_tx, ready_rx) = mpsc::channel();
        let mut spawned: usize = 0;
        for worker in &mut self.workers {
            if let Err(err) = worker.start(Arc::clone(&self.surface), ready_tx.clone()) {
                warn!(error = %err, "Worker spawn failed, tearing down");
                drop(self.shutdown());
                return Err(err);
            }
            spawned = spawned.saturating_add(1);
        }
        drop(ready_tx);

        let mut live: usize = 0;
        while live < spawned && ready_rx.recv().is_ok() {
            live = live.saturating_add(1);
        }
        if live < spawned {
            drop(self.shutdown());
            return Err(SurfaceError::StartupIncomplete {
                live,
                expected: spawned,
            });
        }

        info!(workers = live, "All workers live");
        Ok(())
    }
}

impl<T> SurfaceMap<T> {
    /// The configuration the map was built from.
    pub const fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Shared cell access, as handed to tasks.
    pub const fn surface(&self) -> &Arc<Surface<T>> {
        &self.surface
    }

    /// All workers in region order.
    pub fn workers(&self) -> &[Worker<T>] {
        &self.workers
    }

    /// One worker by id.
    pub fn worker(&self, id: WorkerId) -> Option<&Worker<T>> {
        self.workers.get(id.index())
    }

    /// The regions, indexed like the workers.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Side length of the grid.
    pub fn width(&self) -> usize {
        self.surface.width()
    }

    /// The coordinator clock.
    pub fn clock(&self) -> &SimClock {
        self.surface.clock()
    }

    // -----------------------------------------------------------------------
    // Cell access
    // -----------------------------------------------------------------------

    /// The slot at `(x, y)`, without locking.
    pub fn cell_at(&self, x: usize, y: usize) -> Option<&CellSlot<T>> {
        self.surface.cell_at(x, y)
    }

    /// The slot at a linear index, without locking.
    pub fn cell_at_index(&self, index: usize) -> Option<&CellSlot<T>> {
        self.surface.cell_at_index(index)
    }

    /// Non-blocking acquire.
    pub fn try_cell_at(&self, x: usize, y: usize) -> Option<CellGuard<'_, T>> {
        self.surface.try_cell_at(x, y)
    }

    /// Blocking acquire; `Ok(None)` if the cell does not exist.
    ///
    /// # Errors
    ///
    /// Starvation, cancellation, or re-entrant acquisition.
    pub fn wait_cell_at(&self, x: usize, y: usize) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.surface.wait_cell_at(x, y)
    }

    /// Blocking acquire by linear index; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Starvation, cancellation, or re-entrant acquisition.
    pub fn wait_cell_at_index(&self, index: usize) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.surface.wait_cell_at_index(index)
    }

    /// Write `value` through `guard` and unlock the cell.
    pub fn release(&self, guard: CellGuard<'_, T>, value: T) {
        self.surface.release(guard, value);
    }

    /// Write `value` into `(x, y)`, checking that `guard` owns that cell.
    ///
    /// # Errors
    ///
    /// [`CellError::NotOwner`] or [`CellError::OutOfBounds`].
    pub fn release_at(
        &self,
        x: usize,
        y: usize,
        guard: CellGuard<'_, T>,
        value: T,
    ) -> Result<(), CellError> {
        self.surface.release_at(x, y, guard, value)
    }

    /// Acquire several cells in ascending index order.
    ///
    /// # Errors
    ///
    /// The first acquisition error; nothing stays locked.
    pub fn wait_for_cells(&self, coords: &[Coord]) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        self.surface.wait_for_cells(coords)
    }

    /// Acquire several linear indices in ascending order.
    ///
    /// # Errors
    ///
    /// The first acquisition error; nothing stays locked.
    pub fn wait_for_indices(&self, indices: &[usize]) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        self.surface.wait_for_indices(indices)
    }

    /// Rebuild every payload in place.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::Cell`] if a cell could not be acquired.
    pub fn reset<F>(&self, factory: F) -> Result<(), SurfaceError>
    where
        F: FnMut(usize, usize) -> T,
    {
        Ok(self.surface.reset(factory)?)
    }

    // -----------------------------------------------------------------------
    // Lifecycle fan-out
    // -----------------------------------------------------------------------

    /// Let every worker tick.
    pub fn play_all(&self) {
        self.workers.iter().for_each(Worker::play);
        info!(workers = self.workers.len(), "All workers playing");
    }

    /// Pause every worker after its current tick.
    pub fn pause_all(&self) {
        self.workers.iter().for_each(Worker::pause);
        info!(workers = self.workers.len(), "All workers paused");
    }

    /// Kill every worker. Does not wait for threads to exit.
    pub fn kill_all(&self) {
        self.workers.iter().for_each(Worker::kill);
        info!(workers = self.workers.len(), "All workers killed");
    }

    /// Set every worker's inter-tick sleep.
    pub fn set_all_delays(&self, ms: u64) {
        for worker in &self.workers {
            worker.set_delay(ms);
        }
    }

    /// Switch every worker between free-running and step mode.
    pub fn set_all_continuous(&mut self, continuous: bool) {
        self.continuous = continuous;
        for worker in &self.workers {
            worker.set_continuous(continuous);
        }
    }

    /// Whether workers run freely rather than in step mode.
    pub const fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Workers whose threads are still running.
    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    /// Mean of the workers' last tick durations, as of the last
    /// [`SurfaceMap::tick`].
    pub const fn average_tick_millis(&self) -> u64 {
        self.average_tick_millis
    }

    /// Snapshot of every worker.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(Worker::stats).collect()
    }

    // -----------------------------------------------------------------------
    // Pacing
    // -----------------------------------------------------------------------

    /// Advance the clock and refresh tick statistics.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::Clock`] if the tick counter would overflow.
    pub fn tick(&mut self) -> Result<CoordinatorTick, SurfaceError> {
        let tick = self.surface.clock().advance()?;
        let total = self
            .workers
            .iter()
            .map(Worker::tick_duration_millis)
            .fold(0_u64, u64::saturating_add);
        let count = u64::try_from(self.workers.len()).unwrap_or(u64::MAX);
        self.average_tick_millis = total.checked_div(count).unwrap_or(0);

        let report = CoordinatorTick {
            tick,
            planet_age: self.surface.clock().planet_age(),
            average_tick_millis: self.average_tick_millis,
            live_workers: self.live_workers(),
        };
        debug!(
            tick = report.tick,
            planet_age = report.planet_age,
            average_tick_ms = report.average_tick_millis,
            live_workers = report.live_workers,
            "Coordinator tick"
        );
        Ok(report)
    }

    /// Release the tick barrier if, and only if, every live worker is
    /// parked on it right now.
    ///
    /// On release every worker is also set running, so a pool parked by
    /// [`SurfaceMap::pause_all`] resumes too. Workers in step mode tick once
    /// and park again.
    pub fn all_paused_then_resume(&self) -> bool {
        let released = self.barrier.release_if_all_waiting_then(|| {
            self.workers.iter().for_each(Worker::resume_parked);
        });
        if released {
            debug!(workers = self.barrier.parties(), "Released parked workers");
        }
        released
    }

    /// Release whichever workers are parked on the tick barrier.
    ///
    /// Returns how many were released.
    pub fn step(&self) -> usize {
        self.barrier.release()
    }

    /// Number of workers currently parked on the tick barrier.
    pub fn parked_workers(&self) -> usize {
        self.barrier.waiting()
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Kill every worker, cancel pending cell waits, and join all threads.
    ///
    /// Safe to call more than once; later calls join nothing.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        self.shut_down = true;

        self.kill_all();
        self.surface.cancel();

        for worker in &mut self.workers {
            match worker.join() {
                Ok(()) => report.workers_joined = report.workers_joined.saturating_add(1),
                Err(SurfaceError::WorkerFault(fault)) => {
                    report.workers_joined = report.workers_joined.saturating_add(1);
                    report.faults.push(*fault);
                }
                Err(SurfaceError::WorkerPanicked { worker: id }) => report.panicked.push(id),
                Err(other) => warn!(worker = %worker.id(), error = %other, "Unexpected join error"),
            }
        }

        info!(
            workers_joined = report.workers_joined,
            faults = report.faults.len(),
            panicked = report.panicked.len(),
            ticks = self.surface.clock().tick(),
            "Surface map shut down"
        );
        report
    }
}

impl<T: RenderSource> SurfaceMap<T> {
    /// Display data for `(x, y)`; `None` if missing or locked. Never blocks.
    pub fn render_settings(&self, x: usize, y: usize) -> Option<Vec<Datum>> {
        self.surface.render_settings(x, y)
    }
}

impl<T> Drop for SurfaceMap<T> {
    fn drop(&mut self) {
        if !self.shut_down {
            let report = self.shutdown();
            if !report.is_clean() {
                warn!(
                    faults = report.faults.len(),
                    panicked = report.panicked.len(),
                    "Surface map dropped with unreported worker faults"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strata_grid::ConfigurationError;

    use super::*;
    use crate::task::{TaskError, TickContext};

    struct Noop;

    impl Task<u32> for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn check(&self, _ctx: &TickContext) -> bool {
            false
        }

        fn perform(
            &self,
            _s: &Surface<u32>,
            _ctx: &TickContext,
            _x: usize,
            _y: usize,
        ) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn config(width: usize, division: usize) -> SurfaceConfig {
        let mut config = SurfaceConfig::default();
        config.grid.width = width;
        config.grid.thread_division = division;
        config.timing.worker_delay_ms = 0;
        config.timing.lock_timeout_ms = 200;
        config
    }

    #[test]
    fn invalid_config_fails_before_any_worker() {
        let err = SurfaceMapBuilder::<u32>::new(config(10, 3))
            .build(|_, _| 0)
            .unwrap_err();
        assert!(matches!(
            err,
            SurfaceError::Configuration(ConfigurationError::NotDivisible {
                width: 10,
                division: 3
            })
        ));
    }

    #[test]
    fn build_tiles_regions_per_worker() {
        let map = SurfaceMapBuilder::<u32>::new(config(8, 2))
            .task(Arc::new(Noop))
            .build(|x, y| u32::try_from(x + y).unwrap())
            .unwrap();
        assert_eq!(map.width(), 8);
        assert_eq!(map.workers().len(), 4);
        assert_eq!(map.regions().len(), 4);
        for (worker, region) in map.workers().iter().zip(map.regions()) {
            assert_eq!(worker.region(), *region);
        }
        assert_eq!(map.live_workers(), 0);
    }

    #[test]
    fn factory_runs_once_per_worker_in_region_order() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let _map = SurfaceMapBuilder::<u32>::new(config(4, 2))
            .task_factory(move |id, region: &Region| {
                seen.lock().push((id, *region));
                Noop
            })
            .build(|_, _| 0)
            .unwrap();
        let calls = calls.lock();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.first().unwrap().0, WorkerId::new(0));
        assert_eq!(calls.last().unwrap().1, Region::new(2, 4, 2, 4).unwrap());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut map = SurfaceMapBuilder::<u32>::new(config(4, 2))
            .build(|_, _| 0_u32)
            .unwrap();
        map.start().unwrap();
        assert_eq!(map.live_workers(), 4);
        assert!(matches!(map.start(), Err(SurfaceError::AlreadyStarted)));
        let report = map.shutdown();
        assert_eq!(report.workers_joined, 4);
        assert!(report.is_clean());
        assert_eq!(map.shutdown().workers_joined, 0);
    }

    #[test]
    fn tick_advances_clock() {
        let mut map = SurfaceMapBuilder::<u32>::new(config(2, 1))
            .build(|_, _| 0_u32)
            .unwrap();
        let first = map.tick().unwrap();
        let second = map.tick().unwrap();
        assert_eq!(first.tick, 1);
        assert_eq!(second.tick, 2);
        assert_eq!(second.planet_age, 20_000);
        assert_eq!(map.average_tick_millis(), 0);
    }

    #[test]
    fn coordinator_cell_access_uses_the_lock() {
        let map = SurfaceMapBuilder::<u32>::new(config(4, 2))
            .build(|x, y| u32::try_from(y * 4 + x).unwrap())
            .unwrap();
        let guards = map.wait_for_indices(&[15, 0]).unwrap();
        assert_eq!(
            guards.iter().map(|g| *g.value()).collect::<Vec<_>>(),
            vec![0, 15]
        );
        assert!(map.try_cell_at(3, 3).is_none());
        drop(guards);

        let guard = map.wait_cell_at(3, 3).unwrap().unwrap();
        map.release_at(3, 3, guard, 99).unwrap();
        assert_eq!(*map.try_cell_at(3, 3).unwrap().value(), 99);
    }

    #[test]
    fn shared_task_is_one_instance() {
        struct Shared(AtomicUsize);
        impl Task<u32> for Shared {
            fn name(&self) -> &str {
                "shared"
            }
            fn check(&self, _ctx: &TickContext) -> bool {
                false
            }
            fn perform(
                &self,
                _s: &Surface<u32>,
                _ctx: &TickContext,
                _x: usize,
                _y: usize,
            ) -> Result<(), TaskError> {
                Ok(())
            }
        }

        let shared = Arc::new(Shared(AtomicUsize::new(0)));
        let map = SurfaceMapBuilder::<u32>::new(config(4, 2))
            .task(Arc::clone(&shared) as Arc<dyn Task<u32>>)
            .build(|_, _| 0)
            .unwrap();
        // One reference per worker plus ours.
        assert_eq!(Arc::strong_count(&shared), 5);
        drop(map);
        assert_eq!(shared.0.load(Ordering::SeqCst), 0);
    }
}
