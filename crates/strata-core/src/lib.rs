//! Workers, tasks, tick pacing, and the coordinator for the Strata
//! simulation substrate.
//!
//! A square grid is split into `d x d` regions, one OS thread per region.
//! Each worker runs its ordered task list over its region every tick; any
//! thread may touch any cell, always through the per-cell lock from
//! `strata-grid`.
//!
//! # Modules
//!
//! - [`barrier`] -- [`TickBarrier`], the coordinator-released pacing barrier.
//! - [`clock`] -- [`SimClock`], the coordinator tick counter and planet age.
//! - [`config`] -- Configuration loading from `strata-config.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- [`SurfaceError`].
//! - [`operator`] -- [`OperatorState`] for runtime pause, stop, and speed.
//! - [`runner`] -- [`run_surface`], the async coordinator loop.
//! - [`surface`] -- [`Surface`], shared cell access for tasks.
//! - [`surface_map`] -- [`SurfaceMap`] and its builder: the coordinator.
//! - [`task`] -- The [`Task`] and [`TaskFactory`] traits and fault types.
//! - [`task_manager`] -- [`TaskManager`], one worker's ordered task list.
//! - [`worker`] -- [`Worker`] threads and their lifecycle.
//!
//! [`run_surface`]: runner::run_surface

pub mod barrier;
pub mod clock;
pub mod config;
pub mod error;
pub mod operator;
pub mod runner;
pub mod surface;
pub mod surface_map;
pub mod task;
pub mod task_manager;
pub mod worker;

pub use barrier::{BarrierWait, TickBarrier};
pub use clock::{ClockError, SimClock};
pub use config::{ConfigError, SurfaceConfig};
pub use error::SurfaceError;
pub use operator::{OperatorState, SimulationEndReason, SimulationStatus};
pub use runner::{NoOpCallback, RunResult, RunnerError, TickCallback};
pub use surface::Surface;
pub use surface_map::{CoordinatorTick, ShutdownReport, SurfaceMap, SurfaceMapBuilder};
pub use task::{
    Delay, FaultCause, FaultPolicy, Task, TaskError, TaskFactory, TaskFault, TickContext,
};
pub use task_manager::{RunReport, TaskManager};
pub use worker::{Worker, WorkerId, WorkerState, WorkerStats};
