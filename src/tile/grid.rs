//! Tissue-aware walk over the slide.
//!
//! Origins are visited row-major over the full-resolution tissue bounding
//! rectangle with a stride of `extract_size`:
//!
//! ```text
//!   left                                right
//! top ┌──────┬──────┬──────┬──────┬────┐
//!     │  ✗   │  ✓   │  ✓   │  ✗   │    │   ✓ center on mask
//!     ├──────┼──────┼──────┼──────┤    │   ✗ center off mask
//!     │  ✓   │  ✓   │  ✓   │  ✓   │    │
//!     ├──────┴──────┴──────┴──────┘    │   partial tiles at the right and
//!     │                                │   bottom edge are not visited
//! bot └────────────────────────────────┘
//! ```

use crate::grid::TileCoord;
use crate::tissue::{TissueMask, TissueRect};

/// Lazy, restartable sequence of tile origins on tissue.
#[derive(Debug, Clone)]
pub struct TileGrid<'a> {
    mask: &'a TissueMask,
    region: Option<TissueRect>,
    extract_size: u32,
    slide_dimensions: (u32, u32),
}

impl<'a> TileGrid<'a> {
    /// `slide_dimensions` is `(width, height)` of level 0.
    pub fn new(mask: &'a TissueMask, extract_size: u32, slide_dimensions: (u32, u32)) -> Self {
        Self {
            mask,
            region: mask.tissue_region(),
            extract_size: extract_size.max(1),
            slide_dimensions,
        }
    }

    pub fn extract_size(&self) -> u32 {
        self.extract_size
    }

    /// Full-resolution rectangle the walk covers, if any tissue was found.
    pub fn region(&self) -> Option<TissueRect> {
        self.region
    }

    /// Start a fresh pass over the accepted origins.
    pub fn iter(&self) -> TileOrigins<'_, 'a> {
        TileOrigins {
            grid: self,
            next: self.region.map(|r| (r.top as u64, r.left as u64)),
        }
    }

    /// Collect every accepted origin.
    pub fn origins(&self) -> Vec<TileCoord> {
        self.iter().collect()
    }

    fn accepts(&self, y: u64, x: u64) -> bool {
        let size = self.extract_size as u64;
        let (width, height) = self.slide_dimensions;
        if x + size > width as u64 || y + size > height as u64 {
            return false;
        }
        let half = size as f64 / 2.0;
        self.mask.contains_full_res(x as f64 + half, y as f64 + half)
    }
}

impl<'g, 'a> IntoIterator for &'g TileGrid<'a> {
    type Item = TileCoord;
    type IntoIter = TileOrigins<'g, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`TileGrid::iter`].
#[derive(Debug, Clone)]
pub struct TileOrigins<'g, 'a> {
    grid: &'g TileGrid<'a>,
    /// Next candidate `(y, x)`; `None` once exhausted
    next: Option<(u64, u64)>,
}

impl Iterator for TileOrigins<'_, '_> {
    type Item = TileCoord;

    fn next(&mut self) -> Option<TileCoord> {
        let region = self.grid.region?;
        let size = self.grid.extract_size as u64;
        let (left, right, bottom) = (region.left as u64, region.right() as u64, region.bottom() as u64);

        while let Some((y, x)) = self.next {
            if y + size > bottom {
                self.next = None;
                break;
            }
            self.next = if x + 2 * size <= right {
                Some((y, x + size))
            } else {
                Some((y + size, left))
            };
            if x + size <= right && self.grid.accepts(y, x) {
                return Some(TileCoord::new(y as i64, x as i64));
            }
        }
        None
    }
}
