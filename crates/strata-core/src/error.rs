//! Error types for the coordinator and its workers.

use strata_grid::{CellError, ConfigurationError};

use crate::clock::ClockError;
use crate::task::TaskFault;
use crate::worker::WorkerId;

/// Errors raised while building, running, or tearing down a surface map.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// Grid or tiling parameters were rejected before any thread started.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The simulation clock could not be built or advanced.
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),

    /// A coordinator-side cell operation failed (e.g. during reset).
    #[error("cell error: {0}")]
    Cell(#[from] CellError),

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn {worker}: {source}")]
    Spawn {
        /// The worker that could not be started.
        worker: WorkerId,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// `start` was called on workers that are already running.
    #[error("workers have already been started")]
    AlreadyStarted,

    /// A worker thread exited before announcing that it was live.
    #[error("{live} of {expected} workers came up before startup was abandoned")]
    StartupIncomplete {
        /// Workers that reported in.
        live: usize,
        /// Workers that were spawned.
        expected: usize,
    },

    /// A fail-fast worker stopped on a task fault.
    #[error(transparent)]
    WorkerFault(#[from] Box<TaskFault>),

    /// A worker thread panicked outside the task boundary.
    #[error("{worker} panicked")]
    WorkerPanicked {
        /// The worker whose thread panicked.
        worker: WorkerId,
    },
}
