//! Error types for the `strata-grid` crate.
//!
//! Cell lock failures are reported through [`CellError`]; invalid grid or
//! tiling parameters through [`ConfigurationError`].

/// Errors raised by cell acquisition and release.
///
/// None of these are retried or swallowed by the grid: every lock failure
/// reaches the caller so that a contended cell shows up as an explicit fault
/// instead of a silent hang.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CellError {
    /// A bounded wait on the cell lock expired.
    #[error("thread {thread} starved waiting {waited_ms}ms for cell {index}")]
    Starvation {
        /// Linear index of the contended cell.
        index: usize,
        /// Name and id of the waiting thread.
        thread: String,
        /// How long the thread waited before giving up.
        waited_ms: u64,
    },

    /// A release was attempted with a guard that does not own this cell.
    #[error("thread {thread} does not own cell {index}")]
    NotOwner {
        /// Linear index of the cell the release targeted.
        index: usize,
        /// Name and id of the releasing thread.
        thread: String,
    },

    /// The wait was aborted because the simulation is shutting down.
    #[error("wait for cell {index} cancelled on thread {thread}")]
    Cancelled {
        /// Linear index of the cell being waited on.
        index: usize,
        /// Name and id of the waiting thread.
        thread: String,
    },

    /// The calling thread already owns the cell it tried to acquire.
    #[error("thread {thread} already holds cell {index}")]
    AlreadyHeld {
        /// Linear index of the cell.
        index: usize,
        /// Name and id of the thread.
        thread: String,
    },

    /// A batch request named a cell outside the grid.
    #[error("cell index {index} is outside a grid of {cells} cells")]
    OutOfBounds {
        /// The requested linear index.
        index: usize,
        /// Total number of cells in the grid.
        cells: usize,
    },
}

/// Invalid grid dimensions or tiling parameters.
///
/// Raised while building a grid or a coordinator. It is fatal: no worker
/// thread is started when configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The grid width is zero.
    #[error("grid width must be at least 1")]
    ZeroWidth,

    /// The thread-division factor is zero.
    #[error("thread division must be at least 1")]
    ZeroDivision,

    /// The grid width is not a multiple of the thread-division factor.
    #[error("grid width {width} is not divisible by thread division {division}")]
    NotDivisible {
        /// The configured grid width.
        width: usize,
        /// The configured thread-division factor.
        division: usize,
    },

    /// `width * width` does not fit in `usize`.
    #[error("grid width {width} overflows the cell count")]
    TooLarge {
        /// The configured grid width.
        width: usize,
    },

    /// The cell lock timeout is zero.
    #[error("lock timeout must be at least 1ms")]
    ZeroLockTimeout,

    /// A region was built with a lower bound above its upper bound.
    #[error("invalid region bounds x {x_lo}..{x_hi}, y {y_lo}..{y_hi}")]
    InvertedRegion {
        /// Inclusive lower x bound.
        x_lo: usize,
        /// Exclusive upper x bound.
        x_hi: usize,
        /// Inclusive lower y bound.
        y_lo: usize,
        /// Exclusive upper y bound.
        y_hi: usize,
    },
}
