//! Classification grid cleaning.
//!
//! Two passes, each computed from a snapshot and applied afterwards:
//!
//! 1. [`neighbor_majority`]: isolated cells take the majority label of their
//!    lattice neighbors (optional, see [`DenoiseConfig::neighbor_majority`]).
//! 2. [`merge_small_components`]: 8-connected components of at most
//!    `component_threshold` cells take the majority label around them.
//!
//! Neither pass adds or removes cells. Applying Pass A twice is not
//! idempotent: a cell can flip again when its neighbors flipped.

mod components;
mod majority;

use tracing::debug;

use crate::config::DenoiseConfig;
use crate::grid::ClassificationGrid;

pub use components::{merge_small_components, MergeStats};
pub use majority::neighbor_majority;

/// Counts reported by [`Denoiser::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenoiseStats {
    pub majority_relabeled: usize,
    pub merge: MergeStats,
}

/// Runs the configured passes in order.
#[derive(Debug, Clone, Default)]
pub struct Denoiser {
    config: DenoiseConfig,
}

impl Denoiser {
    pub fn new(config: DenoiseConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, grid: &mut ClassificationGrid) -> DenoiseStats {
        let majority_relabeled = if self.config.neighbor_majority {
            neighbor_majority(grid)
        } else {
            0
        };
        let merge = merge_small_components(grid, self.config.component_threshold);

        debug!(
            cells = grid.len(),
            majority_relabeled,
            small_components = merge.small_components,
            merged_cells = merge.relabeled_cells,
            "Denoised classification grid"
        );
        DenoiseStats {
            majority_relabeled,
            merge,
        }
    }
}
