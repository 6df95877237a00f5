//! Dense square grid of [`CellSlot`]s.
//!
//! The grid is built once. Slots are never replaced afterwards; only their
//! payloads change, through the cell lock. Lookups are pure and never lock.

use std::time::Duration;

use tracing::debug;

use crate::cell::{Cancellation, CellGuard, CellSlot};
use crate::coord::{Coord, calc_index, calc_x, calc_y};
use crate::error::{CellError, ConfigurationError};

/// A `width x width` grid of lockable cells, stored row-major.
#[derive(Debug)]
pub struct Grid<T> {
    width: usize,
    cells: Vec<CellSlot<T>>,
}

impl<T> Grid<T> {
    /// Build a grid, calling `factory(x, y)` once per cell in index order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ZeroWidth`] for a zero width and
    /// [`ConfigurationError::TooLarge`] if `width * width` overflows.
    pub fn build<F>(width: usize, mut factory: F) -> Result<Self, ConfigurationError>
    where
        F: FnMut(usize, usize) -> T,
    {
        if width == 0 {
            return Err(ConfigurationError::ZeroWidth);
        }
        let count = width
            .checked_mul(width)
            .ok_or(ConfigurationError::TooLarge { width })?;

        let cells = (0..count)
            .map(|i| CellSlot::new(i, factory(calc_x(i, width), calc_y(i, width))))
            .collect();

        debug!(width, cells = count, "grid built");
        Ok(Self { width, cells })
    }

    /// Side length of the grid.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells. Always false for a built grid.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Linear index of `(x, y)`, or `None` if it lies outside the grid.
    pub const fn index_of(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width || y >= self.width {
            return None;
        }
        calc_index(x, y, self.width)
    }

    /// Coordinate of a linear index.
    pub const fn coord_of(&self, index: usize) -> Coord {
        Coord::new(calc_x(index, self.width), calc_y(index, self.width))
    }

    /// The slot at `(x, y)`.
    pub fn cell_at(&self, x: usize, y: usize) -> Option<&CellSlot<T>> {
        self.index_of(x, y).and_then(|i| self.cells.get(i))
    }

    /// The slot at a linear index.
    pub fn cell_at_index(&self, index: usize) -> Option<&CellSlot<T>> {
        self.cells.get(index)
    }

    /// Iterate every slot in index order.
    pub fn cells(&self) -> impl Iterator<Item = &CellSlot<T>> {
        self.cells.iter()
    }

    /// Non-blocking acquire of `(x, y)`.
    ///
    /// `None` if the cell does not exist or is contended.
    pub fn try_cell_at(&self, x: usize, y: usize) -> Option<CellGuard<'_, T>> {
        self.cell_at(x, y).and_then(CellSlot::try_get)
    }

    /// Blocking acquire of `(x, y)`.
    ///
    /// `Ok(None)` means the cell does not exist; an existing cell that cannot
    /// be acquired in time is an error.
    pub fn wait_cell_at(
        &self,
        x: usize,
        y: usize,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.cell_at(x, y)
            .map(|slot| slot.wait_get(timeout, cancel))
            .transpose()
    }

    /// Blocking acquire of a linear index. See [`Grid::wait_cell_at`].
    pub fn wait_cell_at_index(
        &self,
        index: usize,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Option<CellGuard<'_, T>>, CellError> {
        self.cell_at_index(index)
            .map(|slot| slot.wait_get(timeout, cancel))
            .transpose()
    }

    /// Release `guard` into the cell at `(x, y)`.
    ///
    /// # Errors
    ///
    /// [`CellError::OutOfBounds`] if `(x, y)` is outside the grid;
    /// [`CellError::NotOwner`] if `guard` belongs to a different cell.
    pub fn release_at(
        &self,
        x: usize,
        y: usize,
        guard: CellGuard<'_, T>,
        value: T,
    ) -> Result<(), CellError> {
        let index = calc_index(x, y, self.width).unwrap_or(usize::MAX);
        let slot = self.cell_at(x, y).ok_or(CellError::OutOfBounds {
            index,
            cells: self.cells.len(),
        })?;
        slot.release(guard, value)
    }

    /// Acquire every listed cell.
    ///
    /// Indices are sorted and deduplicated, then acquired in ascending
    /// order. Every batch caller uses the same order, so two batches can
    /// never wait on each other in a cycle. The guards come back in
    /// ascending index order.
    ///
    /// If any acquisition fails, all cells taken so far are released
    /// unchanged before the error is returned.
    pub fn wait_for_indices(
        &self,
        indices: &[usize],
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        let mut ordered = indices.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        if let Some(&bad) = ordered.iter().find(|&&i| i >= self.cells.len()) {
            return Err(CellError::OutOfBounds {
                index: bad,
                cells: self.cells.len(),
            });
        }

        let mut guards = Vec::with_capacity(ordered.len());
        for index in ordered {
            let Some(slot) = self.cells.get(index) else {
                continue;
            };
            match slot.wait_get(timeout, cancel) {
                Ok(guard) => guards.push(guard),
                Err(err) => {
                    debug!(
                        failed = index,
                        releasing = guards.len(),
                        "batch acquisition failed, releasing held cells"
                    );
                    guards.into_iter().for_each(CellGuard::release_unchanged);
                    return Err(err);
                }
            }
        }
        Ok(guards)
    }

    /// Acquire every listed coordinate. See [`Grid::wait_for_indices`].
    pub fn wait_for_cells(
        &self,
        coords: &[Coord],
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Vec<CellGuard<'_, T>>, CellError> {
        let indices = coords
            .iter()
            .map(|c| {
                self.index_of(c.x, c.y).ok_or(CellError::OutOfBounds {
                    index: calc_index(c.x, c.y, self.width).unwrap_or(usize::MAX),
                    cells: self.cells.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.wait_for_indices(&indices, timeout, cancel)
    }

    /// Replace every payload with `factory(x, y)`, keeping slot identities.
    ///
    /// Each cell is acquired in index order under the usual lock rules, so a
    /// reset running alongside workers is safe.
    pub fn rebuild<F>(
        &self,
        mut factory: F,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<(), CellError>
    where
        F: FnMut(usize, usize) -> T,
    {
        for slot in &self.cells {
            let guard = slot.wait_get(timeout, cancel)?;
            let c = self.coord_of(slot.index());
            slot.release(guard, factory(c.x, c.y))?;
        }
        debug!(width = self.width, "grid rebuilt");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, mpsc};
    use std::thread;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn grid(width: usize) -> Grid<usize> {
        Grid::build(width, |x, y| y * 100 + x).unwrap()
    }

    #[test]
    fn build_populates_every_cell_once() {
        let g = grid(4);
        assert_eq!(g.len(), 16);
        for (i, slot) in g.cells().enumerate() {
            assert_eq!(slot.index(), i);
            let c = g.coord_of(i);
            assert_eq!(*slot.try_get().unwrap().value(), c.y * 100 + c.x);
        }
    }

    #[test]
    fn zero_width_is_rejected() {
        assert_eq!(
            Grid::build(0, |_, _| ()).unwrap_err(),
            ConfigurationError::ZeroWidth
        );
    }

    #[test]
    fn lookups_outside_grid_are_none() {
        let g = grid(3);
        assert!(g.cell_at(3, 0).is_none());
        assert!(g.cell_at(0, 3).is_none());
        assert!(g.cell_at_index(9).is_none());
        assert!(g.try_cell_at(5, 5).is_none());
        assert!(
            g.wait_cell_at(5, 5, TIMEOUT, &Cancellation::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn index_and_coord_are_inverse() {
        let g = grid(5);
        for i in 0..g.len() {
            let c = g.coord_of(i);
            assert_eq!(g.index_of(c.x, c.y), Some(i));
        }
    }

    #[test]
    fn release_at_wrong_cell_is_not_owner() {
        let g = grid(2);
        let guard = g.try_cell_at(0, 0).unwrap();
        let err = g.release_at(1, 0, guard, 42).unwrap_err();
        assert!(matches!(err, CellError::NotOwner { index: 1, .. }));
        assert_eq!(*g.try_cell_at(0, 0).unwrap().value(), 0);
    }

    #[test]
    fn batch_returns_guards_sorted_and_deduplicated() {
        let g = grid(3);
        let guards = g
            .wait_for_indices(&[5, 1, 5, 3], TIMEOUT, &Cancellation::new())
            .unwrap();
        let order: Vec<usize> = guards.iter().map(CellGuard::index).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn batch_out_of_bounds_acquires_nothing() {
        let g = grid(2);
        let err = g
            .wait_for_indices(&[0, 9], TIMEOUT, &Cancellation::new())
            .unwrap_err();
        assert_eq!(err, CellError::OutOfBounds { index: 9, cells: 4 });
        assert!(!g.cell_at_index(0).unwrap().is_locked());
    }

    #[test]
    fn batch_failure_releases_partial_acquisitions() {
        let g = Arc::new(grid(2));
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        // Another thread holds cell 3, the last one the batch needs.
        let holder = {
            let g = Arc::clone(&g);
            thread::spawn(move || {
                let guard = g.try_cell_at(1, 1).unwrap();
                held_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                drop(guard);
            })
        };
        held_rx.recv().unwrap();

        let err = g
            .wait_for_indices(&[0, 1, 3], Duration::from_millis(30), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, CellError::Starvation { index: 3, .. }));
        assert!(!g.cell_at_index(0).unwrap().is_locked());
        assert!(!g.cell_at_index(1).unwrap().is_locked());

        done_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn wait_for_cells_maps_coordinates() {
        let g = grid(3);
        let guards = g
            .wait_for_cells(
                &[Coord::new(2, 2), Coord::new(0, 1)],
                TIMEOUT,
                &Cancellation::new(),
            )
            .unwrap();
        let values: Vec<usize> = guards.iter().map(|g| *g.value()).collect();
        assert_eq!(values, vec![100, 202]);
    }

    #[test]
    fn rebuild_keeps_slots_and_replaces_payloads() {
        let g = grid(2);
        let before: Vec<*const CellSlot<usize>> = g.cells().map(std::ptr::from_ref).collect();
        g.rebuild(|x, y| x + y, TIMEOUT, &Cancellation::new()).unwrap();
        let after: Vec<*const CellSlot<usize>> = g.cells().map(std::ptr::from_ref).collect();
        assert_eq!(before, after);
        assert_eq!(*g.try_cell_at(1, 1).unwrap().value(), 2);
    }
}
