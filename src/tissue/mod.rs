//! Tissue detection on the lowest pyramid level.
//!
//! ```text
//! lowest level ─► gray ─► canny(5, 50) ─► dilate(7x7) ─► erode(7x7)
//!                                                          │
//!            filled mask ◄── keep area > 2% of edges ◄── outer contours
//! ```
//!
//! The mask is kept at lowest-level resolution together with the level's
//! downsample so that full-resolution points can be looked up directly.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::edges::canny;
use imageproc::morphology::{dilate, erode};
use imageproc::point::Point;
use tracing::{debug, warn};

use crate::config::TilingConfig;
use crate::error::SlideError;
use crate::slide::PyramidSource;

const TISSUE: Luma<u8> = Luma([255]);

/// Axis-aligned rectangle `(left, top, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TissueRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl TissueRect {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Scale every component by `factor`, rounding to the nearest pixel.
    pub fn scaled(&self, factor: f64) -> Self {
        let s = |v: u32| (v as f64 * factor).round() as u32;
        Self {
            left: s(self.left),
            top: s(self.top),
            width: s(self.width),
            height: s(self.height),
        }
    }
}

/// Binary tissue mask at the lowest pyramid level.
#[derive(Debug, Clone)]
pub struct TissueMask {
    mask: GrayImage,
    downsample: f64,
}

impl TissueMask {
    /// Detect tissue on the lowest level of `source`.
    pub fn detect(source: &dyn PyramidSource, config: &TilingConfig) -> Result<Self, SlideError> {
        let lowest = source.lowest_level().ok_or(SlideError::InvalidLevel {
            level: 0,
            level_count: 0,
        })?;
        let thumbnail = source.read_level(lowest.index)?;
        debug!(
            level = lowest.index,
            width = lowest.width,
            height = lowest.height,
            downsample = lowest.downsample,
            "Detecting tissue"
        );
        Ok(Self::from_thumbnail(&thumbnail, lowest.downsample, config))
    }

    /// Build the mask from an already loaded low-resolution image.
    pub fn from_thumbnail(thumbnail: &RgbImage, downsample: f64, config: &TilingConfig) -> Self {
        let gray = imageops::grayscale(thumbnail);
        let edges = canny(&gray, config.canny_low, config.canny_high);
        let closed = erode(
            &dilate(&edges, Norm::LInf, config.morph_radius),
            Norm::LInf,
            config.morph_radius,
        );

        let nonzero = closed.pixels().filter(|p| p[0] > 0).count();
        let area_threshold = nonzero as f64 * config.contour_area_fraction;

        let contours: Vec<Contour<i32>> = find_contours::<i32>(&closed)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter(|c| polygon_area(&c.points) > area_threshold)
            .collect();

        let mut mask = GrayImage::new(closed.width(), closed.height());
        if contours.is_empty() {
            warn!("No contours found with area greater than threshold");
        } else {
            for contour in &contours {
                fill_contour(&mut mask, &contour.points);
            }
        }

        debug!(contours = contours.len(), nonzero, "Tissue mask built");
        Self { mask, downsample }
    }

    /// Wrap a precomputed mask (non-zero pixels are tissue).
    pub fn from_mask(mask: GrayImage, downsample: f64) -> Self {
        Self { mask, downsample }
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn downsample(&self) -> f64 {
        self.downsample
    }

    /// True when no pixel is marked as tissue.
    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p[0] == 0)
    }

    /// Whether the mask pixel at `(x, y)` is tissue; false out of bounds.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] > 0
    }

    /// Look up a full-resolution point, truncating to the mask grid.
    pub fn contains_full_res(&self, x: f64, y: f64) -> bool {
        if x < 0.0 || y < 0.0 {
            return false;
        }
        let mx = (x / self.downsample).floor() as u32;
        let my = (y / self.downsample).floor() as u32;
        self.contains(mx, my)
    }

    /// Tight bounding rectangle of the tissue pixels at mask resolution.
    pub fn bounding_rect(&self) -> Option<TissueRect> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| TissueRect {
            left: x0,
            top: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
    }

    /// Bounding rectangle scaled to full-resolution coordinates.
    pub fn tissue_region(&self) -> Option<TissueRect> {
        self.bounding_rect().map(|r| r.scaled(self.downsample))
    }
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    (twice as f64 / 2.0).abs()
}

/// Fill a contour, including its border pixels.
pub(crate) fn fill_contour(mask: &mut GrayImage, points: &[Point<i32>]) {
    for p in points {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < mask.width() && (p.y as u32) < mask.height() {
            mask.put_pixel(p.x as u32, p.y as u32, TISSUE);
        }
    }

    let mut polygon: Vec<Point<i32>> = points.to_vec();
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() >= 3 {
        draw_polygon_mut(mask, &polygon, TISSUE);
    }
}
