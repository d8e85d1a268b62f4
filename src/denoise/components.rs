//! Small connected-component merging.
//!
//! On the dense [`GridIndex`] view, every 8-connected component of a known
//! class with at most `threshold` cells is relabeled to the most frequent
//! label around it. Adjacent cells are counted once per touching component
//! cell, so a neighbor bordering two component cells weighs twice.

use std::collections::VecDeque;

use ndarray::Array2;

use crate::grid::{majority_label, ClassificationGrid, GridIndex, Label, TileCoord, NO_DATA};

const OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Result of one merging pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Components at or below the threshold
    pub small_components: usize,
    /// Cells whose label changed
    pub relabeled_cells: usize,
}

/// Merge small components into their surroundings.
///
/// All decisions are taken on the grid as it was on entry and applied at the
/// end. The set of populated cells never changes.
pub fn merge_small_components(grid: &mut ClassificationGrid, threshold: usize) -> MergeStats {
    let index = GridIndex::build(grid);
    let matrix = index.matrix();
    let (rows, cols) = matrix.dim();

    let mut stats = MergeStats::default();
    let mut changes: Vec<(TileCoord, Label)> = Vec::new();

    for class in Label::KNOWN {
        let value = class.index() as i8;
        let mut visited = Array2::from_elem((rows, cols), false);

        for start_row in 0..rows {
            for start_col in 0..cols {
                if visited[[start_row, start_col]] || matrix[[start_row, start_col]] != value {
                    continue;
                }

                let component = flood(matrix, &mut visited, (start_row, start_col), value);
                if component.len() > threshold {
                    continue;
                }
                stats.small_components += 1;

                // Any neighbor holding `value` would belong to the component.
                let mut counts = [0usize; 4];
                for &(r, c) in &component {
                    for (dr, dc) in OFFSETS {
                        if let Some(label) = index.get_signed(r as i64 + dr, c as i64 + dc) {
                            if label != class {
                                counts[label.index() as usize] += 1;
                            }
                        }
                    }
                }

                let Some(surrounding) = majority_label(&counts) else {
                    continue;
                };
                for (r, c) in component {
                    if let Some(coord) = index.coord(r, c) {
                        changes.push((coord, surrounding));
                    }
                }
            }
        }
    }

    for (coord, label) in changes {
        if grid.insert(coord, label) != Some(label) {
            stats.relabeled_cells += 1;
        }
    }
    stats
}

/// Breadth-first 8-connected fill of the cells equal to `value`.
fn flood(
    matrix: &Array2<i8>,
    visited: &mut Array2<bool>,
    start: (usize, usize),
    value: i8,
) -> Vec<(usize, usize)> {
    debug_assert_ne!(value, NO_DATA);
    let (rows, cols) = matrix.dim();
    let mut component = Vec::new();
    let mut queue = VecDeque::from([start]);
    visited[start] = true;

    while let Some((r, c)) = queue.pop_front() {
        component.push((r, c));
        for (dr, dc) in OFFSETS {
            let (nr, nc) = (r as i64 + dr, c as i64 + dc);
            if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                continue;
            }
            let next = (nr as usize, nc as usize);
            if !visited[next] && matrix[next] == value {
                visited[next] = true;
                queue.push_back(next);
            }
        }
    }
    component
}
