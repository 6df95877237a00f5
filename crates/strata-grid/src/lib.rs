//! Cell storage and locking for the Strata simulation substrate.
//!
//! This crate owns everything that lives at the level of a single cell or
//! a static partition of the grid:
//!
//! # Modules
//!
//! - [`cell`] -- [`CellSlot`], the per-cell fair ownership-transfer lock, its
//!   [`CellGuard`] permit, and the [`Cancellation`] token that aborts waits.
//! - [`coord`] -- [`Coord`] and row-major index math.
//! - [`error`] -- [`CellError`] and [`ConfigurationError`].
//! - [`grid`] -- [`Grid`], the dense square array of cell slots, with single
//!   and batched acquisition.
//! - [`region`] -- [`Region`] rectangles and grid tiling.
//! - [`render`] -- [`Datum`] and the [`RenderSource`] trait.

pub mod cell;
pub mod coord;
pub mod error;
pub mod grid;
pub mod region;
pub mod render;

pub use cell::{Cancellation, CellGuard, CellSlot};
pub use coord::{Coord, calc_index, calc_x, calc_y};
pub use error::{CellError, ConfigurationError};
pub use grid::Grid;
pub use region::Region;
pub use render::{Datum, RenderSource};
