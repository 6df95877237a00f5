//! Row-major index math.
//!
//! A grid of width `w` stores cell `(x, y)` at `y * w + x`. The helpers
//! here are the only place that conversion is written down; everything
//! else in the workspace goes through them.

use serde::{Deserialize, Serialize};

/// A grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    /// Column.
    pub x: usize,
    /// Row.
    pub y: usize,
}

impl Coord {
    /// Create a coordinate.
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl From<(usize, usize)> for Coord {
    fn from((x, y): (usize, usize)) -> Self {
        Self { x, y }
    }
}

/// Linear index of `(x, y)` in a grid of the given width.
///
/// Returns `None` if the multiplication or addition overflows.
pub const fn calc_index(x: usize, y: usize, width: usize) -> Option<usize> {
    match y.checked_mul(width) {
        Some(row) => row.checked_add(x),
        None => None,
    }
}

/// Column of a linear index. A zero width yields 0.
pub const fn calc_x(index: usize, width: usize) -> usize {
    match index.checked_rem(width) {
        Some(x) => x,
        None => 0,
    }
}

/// Row of a linear index. A zero width yields 0.
pub const fn calc_y(index: usize, width: usize) -> usize {
    match index.checked_div(width) {
        Some(y) => y,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_for_every_cell() {
        for width in 1..=17 {
            for i in 0..width * width {
                let x = calc_x(i, width);
                let y = calc_y(i, width);
                assert!(x < width && y < width);
                assert_eq!(calc_index(x, y, width), Some(i), "width {width} index {i}");
            }
        }
    }

    #[test]
    fn row_major_layout() {
        assert_eq!(calc_index(0, 0, 4), Some(0));
        assert_eq!(calc_index(3, 0, 4), Some(3));
        assert_eq!(calc_index(0, 1, 4), Some(4));
        assert_eq!(calc_index(2, 3, 4), Some(14));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(calc_index(1, usize::MAX, 2), None);
    }

    #[test]
    fn zero_width_does_not_divide_by_zero() {
        assert_eq!(calc_x(5, 0), 0);
        assert_eq!(calc_y(5, 0), 0);
    }
}
