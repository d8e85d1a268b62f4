//! Circular hotspot search.
//!
//! Finds the circle of fixed physical diameter with the highest stroma
//! ratio among circles bordered by tumor on all four sides.
//!
//! ```text
//!                 row trunc(cy - r - delta), cols cx-delta..=cx+delta
//!                        ┌───┐
//!                        │ T │
//!                 ┌──┐ ╭─────────╮ ┌──┐
//!   col cx-r-delta│T │ │    ·    │ │T │ col cx+r+delta
//!                 └──┘ ╰─────────╯ └──┘
//!                        │ T │
//!                        └───┘
//! ```
//!
//! Stroma and tumor counts inside a circle come from per-row prefix sums:
//! each row of the circle is one chord, one subtraction per class.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{extract_size, HotspotConfig};
use crate::error::AnalysisError;
use crate::grid::{GridIndex, Label, TileCoord};

use super::ratio::RatioCounts;

/// Hotspot circle radius in grid cells.
///
/// `diameter_mm * 1000 / mpp` pixels across, divided by the tile footprint.
pub fn radius_grid(
    diameter_mm: f64,
    mpp: f64,
    magnification: f64,
    tile_size: u32,
    base_magnification: f64,
) -> Result<f64, AnalysisError> {
    if !(mpp.is_finite() && mpp > 0.0) {
        return Err(AnalysisError::InvalidMpp(mpp));
    }
    if !(magnification.is_finite() && magnification > 0.0) {
        return Err(AnalysisError::InvalidMagnification(magnification));
    }
    let tile_side = extract_size(tile_size, magnification, base_magnification) as f64;
    let diameter_px = diameter_mm * 1000.0 / mpp;
    Ok(diameter_px / (2.0 * tile_side))
}

/// Best circle found by [`HotspotSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotResult {
    /// `(row, col)` of the center in the grid index
    pub center: (usize, usize),
    /// Radius in grid cells
    pub radius: f64,
    /// Stroma percentage inside the circle, in `[0, 100]`
    pub ratio: f64,
    pub counts: RatioCounts,
    /// Full-resolution origin of the center cell, when the cell maps to one
    pub origin: Option<TileCoord>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    order: usize,
    center: (usize, usize),
    ratio: f64,
    counts: RatioCounts,
}

impl Candidate {
    /// Higher ratio wins; the earlier center wins ties.
    fn best(self, other: Candidate) -> Candidate {
        if other.ratio > self.ratio || (other.ratio == self.ratio && other.order < self.order) {
            other
        } else {
            self
        }
    }
}

/// Search over one grid index.
pub struct HotspotSearch<'a> {
    index: &'a GridIndex,
    radius: f64,
    delta: usize,
    step: usize,
    /// `[row, col + 1]` running stroma count per row
    stroma_prefix: Array2<u32>,
    tumor_prefix: Array2<u32>,
}

impl<'a> HotspotSearch<'a> {
    pub fn new(index: &'a GridIndex, radius: f64, config: &HotspotConfig) -> Self {
        let (rows, cols) = index.dim();
        let mut stroma_prefix: Array2<u32> = Array2::zeros((rows, cols + 1));
        let mut tumor_prefix: Array2<u32> = Array2::zeros((rows, cols + 1));
        for r in 0..rows {
            for c in 0..cols {
                let label = index.get(r, c);
                stroma_prefix[[r, c + 1]] =
                    stroma_prefix[[r, c]] + u32::from(label == Some(Label::Stroma));
                tumor_prefix[[r, c + 1]] =
                    tumor_prefix[[r, c]] + u32::from(label == Some(Label::Tumor));
            }
        }

        Self {
            index,
            radius,
            delta: config.delta,
            step: config.step.max(1),
            stroma_prefix,
            tumor_prefix,
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Whether tumor borders the circle centered at `(cy, cx)` on all sides.
    pub fn has_tumor_boundary(&self, cy: usize, cx: usize) -> bool {
        let reach = self.radius + self.delta as f64;
        let delta = self.delta as i64;
        let (cy_i, cx_i) = (cy as i64, cx as i64);
        let is_tumor = |r: i64, c: i64| self.index.get_signed(r, c) == Some(Label::Tumor);

        // Truncated toward zero: a scan line in (-1, 0) lands on row or column 0.
        let up = (cy as f64 - reach).trunc() as i64;
        let down = (cy as f64 + reach).trunc() as i64;
        let left = (cx as f64 - reach).trunc() as i64;
        let right = (cx as f64 + reach).trunc() as i64;

        let strip = |center: i64| (center - delta)..=(center + delta);

        strip(cx_i).any(|c| is_tumor(up, c))
            && strip(cx_i).any(|c| is_tumor(down, c))
            && strip(cy_i).any(|r| is_tumor(r, left))
            && strip(cy_i).any(|r| is_tumor(r, right))
    }

    /// Stroma and tumor cells within `radius` of `(cy, cx)`.
    pub fn circle_counts(&self, cy: usize, cx: usize) -> RatioCounts {
        let (rows, cols) = self.index.dim();
        let r2 = self.radius * self.radius;
        let reach = self.radius.floor() as i64;
        let mut counts = RatioCounts::default();

        for dy in -reach..=reach {
            let row = cy as i64 + dy;
            if row < 0 || row >= rows as i64 {
                continue;
            }
            let Some(half) = chord_half_width(r2, dy) else {
                continue;
            };
            let lo = (cx as i64 - half).max(0) as usize;
            let hi = (cx as i64 + half).min(cols as i64 - 1);
            if hi < lo as i64 {
                continue;
            }
            let (row, hi) = (row as usize, hi as usize + 1);
            counts.stroma += (self.stroma_prefix[[row, hi]] - self.stroma_prefix[[row, lo]]) as usize;
            counts.tumor += (self.tumor_prefix[[row, hi]] - self.tumor_prefix[[row, lo]]) as usize;
        }
        counts
    }

    /// Ratio at one center, or `None` if the center is rejected.
    pub fn evaluate(&self, cy: usize, cx: usize) -> Option<(f64, RatioCounts)> {
        if !self.has_tumor_boundary(cy, cx) {
            return None;
        }
        let counts = self.circle_counts(cy, cx);
        if counts.total() == 0 {
            return None;
        }
        Some((counts.percentage(), counts))
    }

    /// Candidate centers in raster order.
    pub fn centers(&self) -> Vec<(usize, usize)> {
        let (rows, cols) = self.index.dim();
        (0..rows)
            .step_by(self.step)
            .flat_map(|r| (0..cols).step_by(self.step).map(move |c| (r, c)))
            .collect()
    }

    /// Evaluate every candidate center in parallel and keep the best.
    pub fn run(&self) -> Option<HotspotResult> {
        let best = self
            .centers()
            .into_par_iter()
            .enumerate()
            .filter_map(|(order, (cy, cx))| {
                self.evaluate(cy, cx).map(|(ratio, counts)| Candidate {
                    order,
                    center: (cy, cx),
                    ratio,
                    counts,
                })
            })
            .reduce_with(Candidate::best)?;

        Some(HotspotResult {
            center: best.center,
            radius: self.radius,
            ratio: best.ratio,
            counts: best.counts,
            origin: self.index.coord(best.center.0, best.center.1),
        })
    }
}

/// Largest `dx` with `dx^2 + dy^2 <= r2`, or `None` if the row misses the circle.
fn chord_half_width(r2: f64, dy: i64) -> Option<i64> {
    let dy2 = (dy * dy) as f64;
    if dy2 > r2 {
        return None;
    }
    let mut half = (r2 - dy2).sqrt().floor() as i64;
    while ((half + 1) * (half + 1)) as f64 + dy2 <= r2 {
        half += 1;
    }
    while half > 0 && (half * half) as f64 + dy2 > r2 {
        half -= 1;
    }
    Some(half)
}
