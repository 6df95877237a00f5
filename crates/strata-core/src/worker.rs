//! Worker threads.
//!
//! A [`Worker`] owns one [`Region`] and one [`TaskManager`] and runs them on
//! its own OS thread. The coordinator steers it through a shared
//! control block of atomics; nothing else crosses between the
//! coordinator and the thread.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start--> Paused <--play/pause--> Running
//!    \                  \                      /
//!     `------------------`------- kill ------'--> Killed
//! ```
//!
//! Each loop iteration sleeps for the configured delay (a kill cuts the
//! sleep short), parks on the [`TickBarrier`] while paused, and otherwise
//! runs one tick. In step mode (`continuous == false`) the worker parks
//! after every tick until the coordinator releases the barrier.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use strata_grid::Region;
use tracing::{debug, error, info, warn};

use crate::barrier::TickBarrier;
use crate::error::SurfaceError;
use crate::surface::Surface;
use crate::task::{FaultPolicy, TaskFault, TickContext};
use crate::task_manager::TaskManager;

/// Index of a worker in its coordinator, in region order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Wrap a worker index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Observable lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Built but its thread has not been spawned.
    Created,
    /// Live and parked (or about to park) on the tick barrier.
    Paused,
    /// Live and ticking.
    Running,
    /// Killed; the thread has exited or is about to.
    Killed,
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// The worker.
    pub id: WorkerId,
    /// Lifecycle state when the snapshot was taken.
    pub state: WorkerState,
    /// The worker's region.
    pub region: Region,
    /// Completed ticks.
    pub ticks: u64,
    /// Successful `perform` calls over all ticks.
    pub performed: u64,
    /// Task faults, logged or fatal.
    pub faults: u64,
    /// Wall-clock duration of the last tick in milliseconds.
    pub last_tick_ms: u64,
    /// Configured sleep between ticks in milliseconds.
    pub delay_ms: u64,
    /// Whether the worker is parked on the tick barrier.
    pub parked: bool,
}

/// Control block shared between a [`Worker`] handle and its thread.
#[derive(Debug)]
struct WorkerControl {
    started: AtomicBool,
    /// Set by the thread itself when its loop ends, for any reason.
    exited: AtomicBool,
    running: AtomicBool,
    continuous: AtomicBool,
    killed: AtomicBool,
    fail_fast: AtomicBool,
    parked: AtomicBool,
    delay_ms: AtomicU64,
    last_tick_ms: AtomicU64,
    ticks: AtomicU64,
    performed: AtomicU64,
    faults: AtomicU64,
    /// Bumped by every control call that should pull the worker off the
    /// barrier (play, kill, leaving step mode).
    epoch: AtomicU64,
    sleeper: Mutex<()>,
    wake: Condvar,
}

impl WorkerControl {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            running: AtomicBool::new(false),
            continuous: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            fail_fast: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            last_tick_ms: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            performed: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            sleeper: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Killed, or the loop ended on its own (fail-fast fault).
    fn terminal(&self) -> bool {
        self.killed() || self.exited.load(Ordering::Acquire)
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn policy(&self) -> FaultPolicy {
        if self.fail_fast.load(Ordering::Acquire) {
            FaultPolicy::FailFast
        } else {
            FaultPolicy::Resilient
        }
    }

    /// Sleep for the configured delay, returning early on kill.
    ///
    /// A delay too large to express as a deadline sleeps until kill.
    fn sleep_delay(&self) {
        let ms = self.delay_ms.load(Ordering::Acquire);
        if ms == 0 {
            return;
        }
        let deadline = Instant::now().checked_add(Duration::from_millis(ms));
        let mut guard = self.sleeper.lock();
        match deadline {
            Some(deadline) => {
                while !self.killed() && Instant::now() < deadline {
                    self.wake.wait_until(&mut guard, deadline);
                }
            }
            None => {
                while !self.killed() {
                    self.wake.wait(&mut guard);
                }
            }
        }
    }

    fn interrupt_sleep(&self) {
        let _guard = self.sleeper.lock();
        self.wake.notify_all();
    }

    /// Park on the barrier until released, killed, or the epoch moves past
    /// `epoch`.
    fn park(&self, barrier: &TickBarrier, epoch: u64) {
        self.parked.store(true, Ordering::Release);
        barrier.wait(|| self.killed() || self.epoch() != epoch);
        self.parked.store(false, Ordering::Release);
    }
}

/// One region, one task list, one OS thread.
pub struct Worker<T> {
    id: WorkerId,
    region: Region,
    control: Arc<WorkerControl>,
    barrier: Arc<TickBarrier>,
    manager: Option<TaskManager<T>>,
    thread: Option<JoinHandle<Result<(), Box<TaskFault>>>>,
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("region", &self.region)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> Worker<T> {
    /// Create a paused worker. Nothing runs until [`Worker::start`].
    pub fn new(id: WorkerId, manager: TaskManager<T>, barrier: Arc<TickBarrier>) -> Self {
        Self {
            id,
            region: manager.region(),
            control: Arc::new(WorkerControl::new()),
            barrier,
            manager: Some(manager),
            thread: None,
        }
    }

    /// This worker's id.
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// This worker's region.
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Let the worker tick. Wakes it if it is parked.
    pub fn play(&self) {
        if self.control.terminal() {
            warn!(worker = %self.id, "play() ignored on a killed or exited worker");
            return;
        }
        self.control.running.store(true, Ordering::Release);
        self.control.bump_epoch();
        self.barrier.interrupt();
    }

    /// Mark the worker running without pulling it off the barrier.
    ///
    /// Used by the coordinator while it holds the barrier lock, right
    /// before it ends the generation, so the released worker ticks instead
    /// of parking again.
    pub(crate) fn resume_parked(&self) {
        if !self.control.terminal() {
            self.control.running.store(true, Ordering::Release);
        }
    }

    /// Stop ticking after the current tick; the worker then parks.
    pub fn pause(&self) {
        self.control.running.store(false, Ordering::Release);
    }

    /// Terminate the worker after its current tick. Irreversible.
    pub fn kill(&self) {
        self.control.killed.store(true, Ordering::Release);
        self.control.running.store(false, Ordering::Release);
        self.control.bump_epoch();
        self.control.interrupt_sleep();
        self.barrier.interrupt();
    }

    /// Whether [`Worker::kill`] was called.
    pub fn is_killed(&self) -> bool {
        self.control.killed()
    }

    /// Whether the thread has left its loop (or was never started).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Sleep between ticks, effective from the next iteration.
    pub fn set_delay(&self, ms: u64) {
        self.control.delay_ms.store(ms, Ordering::Release);
    }

    /// Switch between free-running and step mode.
    pub fn set_continuous(&self, continuous: bool) {
        self.control.continuous.store(continuous, Ordering::Release);
        if continuous {
            self.control.bump_epoch();
            self.barrier.interrupt();
        }
    }

    /// Whether the worker runs freely rather than one tick per release.
    pub fn is_continuous(&self) -> bool {
        self.control.continuous.load(Ordering::Acquire)
    }

    /// Select how task faults are handled from the next tick on.
    pub fn set_fault_policy(&self, policy: FaultPolicy) {
        self.control
            .fail_fast
            .store(policy == FaultPolicy::FailFast, Ordering::Release);
    }

    /// Whether the worker is parked on the tick barrier.
    pub fn is_parked(&self) -> bool {
        self.control.parked.load(Ordering::Acquire)
    }

    /// Duration of the last completed tick in milliseconds.
    pub fn tick_duration_millis(&self) -> u64 {
        self.control.last_tick_ms.load(Ordering::Acquire)
    }

    /// Completed ticks.
    pub fn ticks(&self) -> u64 {
        self.control.ticks.load(Ordering::Acquire)
    }

    /// Current lifecycle state. A worker whose loop ended on a fail-fast
    /// fault reports [`WorkerState::Killed`].
    pub fn state(&self) -> WorkerState {
        if self.control.terminal() {
            WorkerState::Killed
        } else if !self.control.started.load(Ordering::Acquire) {
            WorkerState::Created
        } else if self.control.running() {
            WorkerState::Running
        } else {
            WorkerState::Paused
        }
    }

    /// Snapshot of the worker's counters.
    pub fn stats(&self) -> WorkerStats {
        let c = &self.control;
        WorkerStats {
            id: self.id,
            state: self.state(),
            region: self.region,
            ticks: c.ticks.load(Ordering::Acquire),
            performed: c.performed.load(Ordering::Acquire),
            faults: c.faults.load(Ordering::Acquire),
            last_tick_ms: c.last_tick_ms.load(Ordering::Acquire),
            delay_ms: c.delay_ms.load(Ordering::Acquire),
            parked: c.parked.load(Ordering::Acquire),
        }
    }

    /// Wait for the thread to exit and collect its outcome.
    ///
    /// Returns `Ok(())` for a worker that was never started or that exited
    /// normally. Call [`Worker::kill`] first or this blocks indefinitely.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::WorkerFault`] if a fail-fast task fault ended the
    /// loop, [`SurfaceError::WorkerPanicked`] if the thread panicked.
    pub fn join(&mut self) -> Result<(), SurfaceError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(fault)) => Err(SurfaceError::WorkerFault(fault)),
            Err(_) => Err(SurfaceError::WorkerPanicked { worker: self.id }),
        }
    }
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn the worker thread, paused.
    ///
    /// The thread sends its id on `ready` once it is live.
    ///
    /// # Errors
    ///
    /// [`SurfaceError::AlreadyStarted`] on a second call and
    /// [`SurfaceError::Spawn`] if the OS refuses the thread.
    pub fn start(
        &mut self,
        surface: Arc<Surface<T>>,
        ready: mpsc::Sender<WorkerId>,
    ) -> Result<(), SurfaceError> {
        let manager = self.manager.take().ok_or(SurfaceError::AlreadyStarted)?;
        let id = self.id;
        let control = Arc::clone(&self.control);
        let barrier = Arc::clone(&self.barrier);

        let handle = thread::Builder::new()
            .name(format!("strata-{id}"))
            .spawn(move || {
                if ready.send(id).is_err() {
                    debug!(worker = %id, "coordinator stopped listening for startup");
                }
                drop(ready);
                let outcome = run_loop(id, &manager, &surface, &control, &barrier);
                control.exited.store(true, Ordering::Release);
                control.running.store(false, Ordering::Release);
                barrier.retire();
                outcome
            })
            .map_err(|source| SurfaceError::Spawn { worker: id, source })?;

        self.control.started.store(true, Ordering::Release);
        self.thread = Some(handle);
        info!(worker = %id, region = %self.region, "Worker started");
        Ok(())
    }
}

fn run_loop<T>(
    id: WorkerId,
    manager: &TaskManager<T>,
    surface: &Surface<T>,
    control: &WorkerControl,
    barrier: &TickBarrier,
) -> Result<(), Box<TaskFault>> {
    loop {
        if control.killed() {
            break;
        }
        control.sleep_delay();
        if control.killed() {
            break;
        }

        let epoch = control.epoch();
        if !control.running() {
            control.park(barrier, epoch);
            continue;
        }

        let worker_tick = control.ticks.load(Ordering::Acquire).saturating_add(1);
        let ctx = TickContext {
            worker: id,
            worker_tick,
            sim_tick: surface.clock().tick(),
            planet_age: surface.clock().planet_age(),
            region: manager.region(),
        };

        let started = Instant::now();
        let outcome = manager.run(surface, &ctx, control.policy());
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        control.last_tick_ms.store(elapsed, Ordering::Release);
        control.ticks.store(worker_tick, Ordering::Release);

        match outcome {
            Ok(report) => {
                control.performed.fetch_add(report.performed, Ordering::AcqRel);
                control.faults.fetch_add(report.faults, Ordering::AcqRel);
                debug!(
                    worker = %id,
                    tick = worker_tick,
                    performed = report.performed,
                    elapsed_ms = elapsed,
                    "Worker tick complete"
                );
            }
            Err(fault) if control.killed() => {
                debug!(
                    worker = %id,
                    task = %fault.task,
                    error = %fault.cause,
                    "Task interrupted by shutdown"
                );
                break;
            }
            Err(fault) => {
                control.faults.fetch_add(1, Ordering::AcqRel);
                control.running.store(false, Ordering::Release);
                error!(
                    worker = %id,
                    task = %fault.task,
                    tick = fault.tick,
                    error = %fault.cause,
                    "Task fault under fail-fast policy, stopping worker"
                );
                return Err(fault);
            }
        }

        let epoch = control.epoch();
        if !control.continuous.load(Ordering::Acquire) || !control.running() {
            control.park(barrier, epoch);
        }
    }

    info!(
        worker = %id,
        ticks = control.ticks.load(Ordering::Acquire),
        "Worker exited"
    );
    Ok(())
}
