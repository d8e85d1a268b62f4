//! Isolated-cell correction.
//!
//! A cell whose existing lattice neighbors all disagree with it takes the
//! most frequent neighbor label (smallest label on ties). Cells without
//! neighbors, or with at least one agreeing neighbor, keep their label.

use crate::grid::{majority_label, ClassificationGrid, Label, TileCoord};

/// Relabel isolated cells in one snapshot-then-apply pass.
///
/// Returns the number of cells whose label changed.
pub fn neighbor_majority(grid: &mut ClassificationGrid) -> usize {
    let changes: Vec<(TileCoord, Label)> = grid
        .iter()
        .filter_map(|(coord, label)| {
            let mut counts = [0usize; 4];
            let mut any = false;
            for neighbor in grid.neighbor_labels(&coord) {
                if neighbor == label {
                    return None;
                }
                counts[neighbor.index() as usize] += 1;
                any = true;
            }
            if !any {
                return None;
            }
            majority_label(&counts).map(|new| (coord, new))
        })
        .collect();

    let changed = changes.len();
    for (coord, label) in changes {
        grid.insert(coord, label);
    }
    changed
}
