//! Shared cell access for tasks and the coordinator.
//!
//! [`Surface`] bundles the grid with the settings every cell wait needs (the
//! configured lock timeout and the shutdown [`Cancellation`]) and with the
//! [`SimClock`]. Workers hold it through an `Arc`; tasks receive it by
//! reference in every hook. All writes go through the cell lock, whether
//! the cell lies in the caller's region or not.

use std::time::Duration;

use strata_grid::{
    Cancellation, CellError, CellGuard, CellSlot, Coord, Datum, Grid, RenderSource,
};
use tracing::info;

use crate::clock::SimClock;

/// The grid plus the context needed to lock its cells.
#[derive(Debug)]
pub struct Surface<T> {
    grid: Grid<T>,
    lock_timeout: Duration,
    cancellation: Cancellation,
    clock: SimClock,
}

impl<T> Surface<T> {
    /// Wrap a built grid.
    pub fn new(grid: Grid<T>, lock_timeout: Duration, clock: SimClock) -> Self {
        Self {
            grid,
            lock_timeout,
            cancellation: Cancellation::new(),
            clock,
        }
    }

    /// Side length of the grid.
    pub const fn width(&self) -> usize {
        self.grid.width()
    }

    /// The underlying grid.
    pub const fn grid(&self) -> &Grid<T> {
        &self.grid
    }

    /// The coordinator clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Bounded wait applied to every blocking acquire.
    pub const fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// The shutdown token observed by every blocking acquire.
    pub const fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Fail every current and future blocking acquire with
    /// [`CellError::Cancelled`].
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// The slot at `(x, y)`, without locking.
    pub fn cell_at(&self, x: usize, y: usize) -> Option<&CellSlot<T>> {
        self.grid.cell_at(x, y)
    }

    /// The slot at a linear index, without locking.
    pub fn cell_at_index(&self, index: usize) -> Option<&CellSlot<T>> {
        self.grid.cell_at_index(index)
    }

    /// Non-blocking acquire; `None` if missing or contended.
    pub fn try_cell_at(&self, x: usize, y: usize) -> Option<CellGuard<'_, T>> {
        self.grid.try_cell_at(x, y)
    }

    /// Blocking acquire of `(x, y)`; `Ok(None)` if the cell does not exist.
    ///
    /// # Errors
    ///
    /// [`CellError::Starvation`], [`CellError::Cancelled`] or
    /// [`CellError::AlreadyHeld`] from the cell lock.
    pub fn wait_cell_at(&self, x: usize, y: usize) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.grid
            .wait_cell_at(x, y, self.lock_timeout, &self.cancellation)
    }

    /// Blocking acquire of a linear index; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// See [`Surface::wait_cell_at`].
    pub fn wait_cell_at_index(&self, index: usize) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.grid
            .wait_cell_at_index(index, self.lock_timeout, &self.cancellation)
    }

    /// Write `value` into the cell owned by `guard` and unlock it.
    pub fn release(&self, guard: CellGuard<'_, T>, value: T) {
        guard.release(value);
    }

    /// Write `value` into `(x, y)` using `guard` as proof of ownership.
    ///
    /// # Errors
    ///
    /// [`CellError::NotOwner`] if `guard` belongs to another cell and
    /// [`CellError::OutOfBounds`] if `(x, y)` is outside the grid.
    pub fn release_at(
        &self,
        x: usize,
        y: usize,
        guard: CellGuard<'_, T>,
        value: T,
    ) -> Result<(), CellError> {
        self.grid.release_at(x, y, guard, value)
    }

    /// Acquire several cells in ascending index order.
    ///
    /// # Errors
    ///
    /// The first acquisition error; no cell stays locked when it is returned.
    pub fn wait_for_cells(&self, coords: &[Coord]) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        self.grid
            .wait_for_cells(coords, self.lock_timeout, &self.cancellation)
    }

    /// Acquire several linear indices in ascending order.
    ///
    /// # Errors
    ///
    /// See [`Surface::wait_for_cells`].
    pub fn wait_for_indices(&self, indices: &[usize]) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        self.grid
            .wait_for_indices(indices, self.lock_timeout, &self.cancellation)
    }

    /// Replace every payload, keeping slot identities.
    ///
    /// # Errors
    ///
    /// The first acquisition error; cells already rebuilt keep their new
    /// payload.
    pub fn reset<F>(&self, factory: F) -> Result<(), CellError>
    where
        F: FnMut(usize, usize) -> T,
    {
        self.grid
            .rebuild(factory, self.lock_timeout, &self.cancellation)?;
        info!(width = self.grid.width(), "surface reset");
        Ok(())
    }
}

impl<T: RenderSource> Surface<T> {
    /// Display data for `(x, y)`, or `None` if the cell is missing or
    /// currently locked. Never blocks.
    pub fn render_settings(&self, x: usize, y: usize) -> Option<Vec<Datum>> {
        let guard = self.grid.try_cell_at(x, y)?;
        let settings = guard.value().render_settings();
        guard.release_unchanged();
        Some(settings)
    }
}
