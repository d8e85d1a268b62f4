//! Dense view over a [`ClassificationGrid`].
//!
//! Rows are the unique sorted `y` values, columns the unique sorted `x`
//! values. Cells without a tile hold [`NO_DATA`]:
//!
//! ```text
//!            x=0   x=256  x=768
//!   y=0    [  1,    2,    -1 ]
//!   y=512  [ -1,    1,     1 ]
//! ```
//!
//! Gaps in the coordinate lattice collapse: two tiles 512 px apart with
//! nothing between them end up in adjacent columns.

use ndarray::Array2;

use super::classification::{ClassificationGrid, Label};
use super::coord::TileCoord;

/// Sentinel for cells with no classification.
pub const NO_DATA: i8 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct GridIndex {
    matrix: Array2<i8>,
    ys: Vec<i64>,
    xs: Vec<i64>,
}

impl GridIndex {
    pub fn build(grid: &ClassificationGrid) -> Self {
        let mut ys: Vec<i64> = grid.iter().map(|(c, _)| c.y).collect();
        let mut xs: Vec<i64> = grid.iter().map(|(c, _)| c.x).collect();
        ys.sort_unstable();
        ys.dedup();
        xs.sort_unstable();
        xs.dedup();

        let mut matrix = Array2::from_elem((ys.len(), xs.len()), NO_DATA);
        for (coord, label) in grid.iter() {
            // Both searches succeed: the vectors were built from these coords.
            if let (Ok(row), Ok(col)) = (ys.binary_search(&coord.y), xs.binary_search(&coord.x)) {
                matrix[[row, col]] = label.index() as i8;
            }
        }

        Self { matrix, ys, xs }
    }

    /// Wrap a label matrix directly; row/column indices double as coordinates.
    pub fn from_matrix(matrix: Array2<i8>) -> Self {
        let (rows, cols) = matrix.dim();
        Self {
            ys: (0..rows as i64).collect(),
            xs: (0..cols as i64).collect(),
            matrix,
        }
    }

    pub fn matrix(&self) -> &Array2<i8> {
        &self.matrix
    }

    /// `(rows, cols)`
    pub fn dim(&self) -> (usize, usize) {
        self.matrix.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Label at a cell; `None` for empty or out-of-range cells.
    pub fn get(&self, row: usize, col: usize) -> Option<Label> {
        self.matrix
            .get([row, col])
            .and_then(|&v| Label::from_index(v as i64))
    }

    /// Same as [`get`](Self::get) for signed indices.
    pub fn get_signed(&self, row: i64, col: i64) -> Option<Label> {
        if row < 0 || col < 0 {
            return None;
        }
        self.get(row as usize, col as usize)
    }

    /// Full-resolution coordinate of a cell.
    pub fn coord(&self, row: usize, col: usize) -> Option<TileCoord> {
        Some(TileCoord::new(*self.ys.get(row)?, *self.xs.get(col)?))
    }

    /// Cell holding a full-resolution coordinate.
    pub fn cell(&self, coord: &TileCoord) -> Option<(usize, usize)> {
        let row = self.ys.binary_search(&coord.y).ok()?;
        let col = self.xs.binary_search(&coord.x).ok()?;
        Some((row, col))
    }

    /// Number of cells holding `label`.
    pub fn count(&self, label: Label) -> usize {
        let value = label.index() as i8;
        self.matrix.iter().filter(|&&v| v == value).count()
    }
}
