//! Tumor-stroma ratio arithmetic.

use serde::{Deserialize, Serialize};

use crate::grid::{ClassificationGrid, GridIndex, Label};

/// Stroma and tumor cell counts of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioCounts {
    pub stroma: usize,
    pub tumor: usize,
}

impl RatioCounts {
    pub fn new(stroma: usize, tumor: usize) -> Self {
        Self { stroma, tumor }
    }

    pub fn from_grid(grid: &ClassificationGrid) -> Self {
        let counts = grid.label_counts();
        Self {
            stroma: counts[Label::Stroma.index() as usize],
            tumor: counts[Label::Tumor.index() as usize],
        }
    }

    pub fn from_index(index: &GridIndex) -> Self {
        Self {
            stroma: index.count(Label::Stroma),
            tumor: index.count(Label::Tumor),
        }
    }

    pub fn total(&self) -> usize {
        self.stroma + self.tumor
    }

    /// `100 * stroma / (stroma + tumor)`, or 0 when both are zero.
    pub fn percentage(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => 100.0 * self.stroma as f64 / total as f64,
        }
    }
}

/// Whole-slide ratio over every cell of the grid.
pub fn whole_slide_ratio(grid: &ClassificationGrid) -> f64 {
    RatioCounts::from_grid(grid).percentage()
}
