//! Rectangular fitting regions in image pixel coordinates.
//!
//! A region uses inclusive bounds on rows (y) and columns (x), with rows
//! increasing downward and columns increasing rightward. Pixel centres sit at
//! integer coordinates, so pixel `(row, col)` covers `[col - 0.5, col + 0.5)`
//! along x.

use serde::{Deserialize, Serialize};

/// A named rectangular region of interest (whole image or a sub-strip)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Identifier used in logs, errors and checkpoint names
    pub name: String,
    /// Minimum row (y) coordinate (inclusive)
    pub min_row: usize,
    /// Minimum column (x) coordinate (inclusive)
    pub min_col: usize,
    /// Maximum row (y) coordinate (inclusive)
    pub max_row: usize,
    /// Maximum column (x) coordinate (inclusive)
    pub max_col: usize,
}

impl Region {
    /// Create a region from inclusive bounds.
    ///
    /// # Arguments
    /// * `name` - Region identifier
    /// * `min_row` - Top edge (inclusive)
    /// * `min_col` - Left edge (inclusive)
    /// * `max_row` - Bottom edge (inclusive)
    /// * `max_col` - Right edge (inclusive)
    pub fn from_coords(
        name: impl Into<String>,
        min_row: usize,
        min_col: usize,
        max_row: usize,
        max_col: usize,
    ) -> Self {
        Self {
            name: name.into(),
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// The whole image of shape `(rows, cols)`
    pub fn whole_image(shape: (usize, usize)) -> Self {
        Self::from_coords(
            "full",
            0,
            0,
            shape.0.saturating_sub(1),
            shape.1.saturating_sub(1),
        )
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    /// `(rows, cols)` of arrays covering this region
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Image coordinates `(x, y)` of the region's first pixel
    pub fn origin(&self) -> (f64, f64) {
        (self.min_col as f64, self.min_row as f64)
    }

    pub fn is_valid(&self) -> bool {
        self.min_row <= self.max_row && self.min_col <= self.max_col
    }

    /// Whether the region lies fully inside an image of shape `(rows, cols)`
    pub fn fits_within(&self, shape: (usize, usize)) -> bool {
        self.is_valid() && self.max_row < shape.0 && self.max_col < shape.1
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_col as f64 - 0.5
            && x < self.max_col as f64 + 0.5
            && y >= self.min_row as f64 - 0.5
            && y < self.max_row as f64 + 0.5
    }

    /// Euclidean distance from `(x, y)` to the region's pixel area, zero inside
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        let dx = (self.min_col as f64 - 0.5 - x)
            .max(x - (self.max_col as f64 + 0.5))
            .max(0.0);
        let dy = (self.min_row as f64 - 0.5 - y)
            .max(y - (self.max_row as f64 + 0.5))
            .max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}
