//! Sparse classification grid.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::coord::TileCoord;

// =============================================================================
// Label
// =============================================================================

/// Tissue class assigned to a tile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Label {
    Other = 0,
    Stroma = 1,
    Tumor = 2,
    /// Not classified; carried through but never merged as a class
    Unknown = 3,
}

impl Label {
    /// Classes that take part in component merging, in label order.
    pub const KNOWN: [Label; 3] = [Label::Other, Label::Stroma, Label::Tumor];

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Label::Other),
            1 => Some(Label::Stroma),
            2 => Some(Label::Tumor),
            3 => Some(Label::Unknown),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn is_known(self) -> bool {
        self != Label::Unknown
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Other => "Other",
            Label::Stroma => "Stroma",
            Label::Tumor => "Tumor",
            Label::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the most frequent label; ties go to the smallest label.
///
/// `counts` is indexed by label value.
pub fn majority_label(counts: &[usize; 4]) -> Option<Label> {
    let max = counts.iter().copied().max().filter(|&m| m > 0)?;
    counts
        .iter()
        .position(|&c| c == max)
        .and_then(|i| Label::from_index(i as i64))
}

// =============================================================================
// Classification Grid
// =============================================================================

/// Sparse map from tile origin to label, on a lattice of spacing `step`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationGrid {
    cells: HashMap<TileCoord, Label>,
    step: i64,
}

impl ClassificationGrid {
    pub fn new(step: i64) -> Self {
        Self {
            cells: HashMap::new(),
            step,
        }
    }

    /// Build from cells, inferring the lattice spacing from the coordinates.
    pub fn from_cells(cells: impl IntoIterator<Item = (TileCoord, Label)>) -> Self {
        let cells: HashMap<TileCoord, Label> = cells.into_iter().collect();
        let step = infer_step(cells.keys());
        Self { cells, step }
    }

    /// Tile spacing in full-resolution pixels.
    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn set_step(&mut self, step: i64) {
        self.step = step;
    }

    pub fn insert(&mut self, coord: TileCoord, label: Label) -> Option<Label> {
        self.cells.insert(coord, label)
    }

    pub fn get(&self, coord: &TileCoord) -> Option<Label> {
        self.cells.get(coord).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileCoord, Label)> + '_ {
        self.cells.iter().map(|(c, l)| (*c, *l))
    }

    /// Cells in row-major order.
    pub fn sorted_cells(&self) -> Vec<(TileCoord, Label)> {
        let mut cells: Vec<_> = self.iter().collect();
        cells.sort_unstable_by_key(|(c, _)| *c);
        cells
    }

    /// Number of cells per label, indexed by label value.
    pub fn label_counts(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for label in self.cells.values() {
            counts[label.index() as usize] += 1;
        }
        counts
    }

    /// Labels of the existing lattice neighbors of `coord`.
    pub fn neighbor_labels(&self, coord: &TileCoord) -> impl Iterator<Item = Label> + '_ {
        coord
            .neighbors(self.step)
            .into_iter()
            .filter_map(|n| self.get(&n))
    }
}

impl FromIterator<(TileCoord, Label)> for ClassificationGrid {
    fn from_iter<T: IntoIterator<Item = (TileCoord, Label)>>(iter: T) -> Self {
        Self::from_cells(iter)
    }
}

/// Smallest positive gap between distinct x (or y) values; 1 if none.
fn infer_step<'a>(coords: impl Iterator<Item = &'a TileCoord>) -> i64 {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for c in coords {
        xs.push(c.x);
        ys.push(c.y);
    }
    let min_gap = |values: &mut Vec<i64>| {
        values.sort_unstable();
        values.dedup();
        values.windows(2).map(|w| w[1] - w[0]).min()
    };
    match (min_gap(&mut xs), min_gap(&mut ys)) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => 1,
    }
}
