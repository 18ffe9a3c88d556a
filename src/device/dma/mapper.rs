//! Output-to-source coordinate mapping.
//!
//! Each axis is mapped independently with the reflect rule:
//!
//! ```text
//! output p:   0   1   2  ...  w   w+1
//! source:     1   0   1  ... w-1  w-2
//! ```
//!
//! The border reflects the *second* line inward instead of repeating the
//! edge line. Corners fall out of composing the two axes.

use super::{DmaError, InvalidConfig};
use crate::device::bus_spec::{MIN_MIRROR_WIDTH, PADDING};

/// Map one output axis position to its source position.
///
/// Requires `width >= 3` and `p < width + 2`; the result is always in
/// `[0, width)`.
#[inline]
pub fn map_axis(p: usize, width: usize) -> usize {
    debug_assert!(width >= MIN_MIRROR_WIDTH, "width {} below mirror minimum", width);
    debug_assert!(p < width + PADDING, "output position {} outside padded width", p);

    if p == 0 {
        1
    } else if p == width + 1 {
        width - 2
    } else {
        p - 1
    }
}

/// A coordinate in the source matrix.
///
/// Only produced by [`CoordinateMapper`], so it is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceCoord {
    row: usize,
    col: usize,
}

impl SourceCoord {
    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    #[inline]
    pub fn col(&self) -> usize {
        self.col
    }
}

/// Coordinate mapper bound to one matrix width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateMapper {
    width: usize,
}

impl CoordinateMapper {
    /// Create a mapper, rejecting widths the reflect formula cannot serve.
    pub fn new(width: usize) -> Result<Self, DmaError> {
        match width {
            0 => Err(InvalidConfig::ZeroWidth.into()),
            w if w < MIN_MIRROR_WIDTH => Err(InvalidConfig::BelowMirrorMinimum(w).into()),
            w => Ok(Self { width: w }),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Width of the padded output on each axis.
    pub fn padded_width(&self) -> usize {
        self.width + PADDING
    }

    /// Map an output coordinate to the source coordinate it copies.
    #[inline]
    pub fn map(&self, out_row: usize, out_col: usize) -> SourceCoord {
        SourceCoord {
            row: map_axis(out_row, self.width),
            col: map_axis(out_col, self.width),
        }
    }

    /// Source row feeding output row `out_row`.
    #[inline]
    pub fn source_row(&self, out_row: usize) -> usize {
        map_axis(out_row, self.width)
    }

    /// First output row at or after `from_row` that reads `source_row`.
    pub fn next_use(&self, source_row: usize, from_row: usize) -> Option<usize> {
        (from_row..self.padded_width()).find(|&r| self.source_row(r) == source_row)
    }

    /// Source rows in first-use order, each listed once.
    pub fn fetch_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.width);
        for out_row in 0..self.padded_width() {
            let row = self.source_row(out_row);
            if !order.contains(&row) {
                order.push(row);
            }
        }
        order
    }
}
