//! Rectangular sub-ranges of the grid assigned to workers.
//!
//! A [`Region`] is lower-inclusive and upper-exclusive on both axes. The
//! coordinator derives its regions with [`Region::tile`], which splits a
//! `width x width` grid into `division * division` equal squares that cover
//! every coordinate exactly once.

use serde::{Deserialize, Serialize};

use crate::coord::Coord;
use crate::error::ConfigurationError;

/// An immutable rectangle of grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    x_lo: usize,
    x_hi: usize,
    y_lo: usize,
    y_hi: usize,
}

impl Region {
    /// Create a region from its bounds.
    ///
    /// Empty regions (`x_lo == x_hi` or `y_lo == y_hi`) are legal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvertedRegion`] if a lower bound is
    /// greater than its upper bound.
    pub const fn new(
        x_lo: usize,
        x_hi: usize,
        y_lo: usize,
        y_hi: usize,
    ) -> Result<Self, ConfigurationError> {
        if x_lo > x_hi || y_lo > y_hi {
            return Err(ConfigurationError::InvertedRegion {
                x_lo,
                x_hi,
                y_lo,
                y_hi,
            });
        }
        Ok(Self {
            x_lo,
            x_hi,
            y_lo,
            y_hi,
        })
    }

    /// Split a `width x width` grid into `division * division` regions.
    ///
    /// Regions are returned in row-major region order: the first `division`
    /// entries cover the top band of rows from left to right.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if either parameter is zero or the width
    /// is not a multiple of the division.
    pub fn tile(width: usize, division: usize) -> Result<Vec<Self>, ConfigurationError> {
        if width == 0 {
            return Err(ConfigurationError::ZeroWidth);
        }
        if division == 0 {
            return Err(ConfigurationError::ZeroDivision);
        }
        if width.checked_rem(division) != Some(0) {
            return Err(ConfigurationError::NotDivisible { width, division });
        }
        let side = width
            .checked_div(division)
            .ok_or(ConfigurationError::ZeroDivision)?;

        let mut regions = Vec::new();
        let mut y_lo = 0_usize;
        while y_lo < width {
            let y_hi = y_lo.saturating_add(side);
            let mut x_lo = 0_usize;
            while x_lo < width {
                let x_hi = x_lo.saturating_add(side);
                regions.push(Self::new(x_lo, x_hi, y_lo, y_hi)?);
                x_lo = x_hi;
            }
            y_lo = y_hi;
        }
        Ok(regions)
    }

    /// Inclusive lower x bound.
    pub const fn x_lo(&self) -> usize {
        self.x_lo
    }

    /// Exclusive upper x bound.
    pub const fn x_hi(&self) -> usize {
        self.x_hi
    }

    /// Inclusive lower y bound.
    pub const fn y_lo(&self) -> usize {
        self.y_lo
    }

    /// Exclusive upper y bound.
    pub const fn y_hi(&self) -> usize {
        self.y_hi
    }

    /// Number of columns.
    pub const fn width(&self) -> usize {
        self.x_hi.saturating_sub(self.x_lo)
    }

    /// Number of rows.
    pub const fn height(&self) -> usize {
        self.y_hi.saturating_sub(self.y_lo)
    }

    /// Number of coordinates in the region.
    pub const fn len(&self) -> usize {
        self.width().saturating_mul(self.height())
    }

    /// Whether the region contains no coordinates.
    pub const fn is_empty(&self) -> bool {
        self.x_lo == self.x_hi || self.y_lo == self.y_hi
    }

    /// Whether `(x, y)` lies inside the region.
    pub const fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x_lo && x < self.x_hi && y >= self.y_lo && y < self.y_hi
    }

    /// Iterate the region row-major: `y` outer, `x` inner.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + use<> {
        let (x_lo, x_hi) = (self.x_lo, self.x_hi);
        (self.y_lo..self.y_hi).flat_map(move |y| (x_lo..x_hi).map(move |x| Coord::new(x, y)))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}..{}) x [{}..{})",
            self.x_lo, self.x_hi, self.y_lo, self.y_hi
        )
    }
}
