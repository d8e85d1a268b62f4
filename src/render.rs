//! Visual outputs: the hotspot map, the prediction overlay and the tumor
//! front.
//!
//! Colors: Other yellow, Stroma green, Tumor red, no data white, hotspot
//! circle blue.

use std::path::Path;

use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_hollow_circle_mut;
use imageproc::morphology::{close, erode, open};
use tracing::debug;

use crate::error::{IoError, SlideError};
use crate::grid::{ClassificationGrid, GridIndex, Label};
use crate::slide::PyramidSource;
use crate::tissue::{fill_contour, polygon_area};
use crate::tsr::HotspotResult;

pub const OTHER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const STROMA_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TUMOR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const EMPTY_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const HOTSPOT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Default side of one grid cell in the hotspot map.
pub const DEFAULT_CELL_PIXELS: u32 = 8;

/// Overlay opacity, as in a half-transparent mask.
const OVERLAY_ALPHA: f32 = 0.5;

/// Opacity of the filled tumor region behind the front.
const FRONT_ALPHA: f32 = 0.3;

/// Tumor regions smaller than this fraction of the level are dropped.
const FRONT_MIN_AREA_FRACTION: f64 = 0.0005;

/// Width of the front outline in level pixels.
const FRONT_EDGE_WIDTH: u8 = 2;

pub fn label_color(label: Option<Label>) -> Rgb<u8> {
    match label {
        Some(Label::Other) => OTHER_COLOR,
        Some(Label::Stroma) => STROMA_COLOR,
        Some(Label::Tumor) => TUMOR_COLOR,
        Some(Label::Unknown) | None => EMPTY_COLOR,
    }
}

/// Draw the grid, one `cell_px` square per cell, and the hotspot circle.
pub fn render_hotspot(
    index: &GridIndex,
    hotspot: Option<&HotspotResult>,
    cell_px: u32,
) -> RgbImage {
    let cell_px = cell_px.max(1);
    let (rows, cols) = index.dim();
    let mut image = RgbImage::from_fn(cols as u32 * cell_px, rows as u32 * cell_px, |x, y| {
        label_color(index.get((y / cell_px) as usize, (x / cell_px) as usize))
    });

    if let Some(h) = hotspot {
        let half = cell_px as f64 / 2.0;
        let cx = (h.center.1 as f64 * cell_px as f64 + half).round() as i32;
        let cy = (h.center.0 as f64 * cell_px as f64 + half).round() as i32;
        let radius = (h.radius * cell_px as f64).round() as i32;
        // Two pixels wide
        for r in [radius, radius - 1] {
            if r > 0 {
                draw_hollow_circle_mut(&mut image, (cx, cy), r, HOTSPOT_COLOR);
            }
        }
    }
    image
}

/// Blend label colors over a pyramid level, one footprint per tile.
///
/// Tiles whose footprint would cross the level border are skipped.
pub fn render_overlay(
    source: &dyn PyramidSource,
    grid: &ClassificationGrid,
    extract_size: u32,
    level: usize,
) -> Result<RgbImage, SlideError> {
    let info = source.level(level).ok_or(SlideError::InvalidLevel {
        level,
        level_count: source.level_count(),
    })?;
    let mut image = source.read_level(level)?;
    let side = (extract_size as f64 / info.downsample).ceil() as u32;

    for (coord, label) in grid.iter() {
        if !label.is_known() || coord.x < 0 || coord.y < 0 {
            continue;
        }
        let x0 = (coord.x as f64 / info.downsample).ceil() as u32;
        let y0 = (coord.y as f64 / info.downsample).ceil() as u32;
        if x0 + side > info.width || y0 + side > info.height {
            continue;
        }
        let color = label_color(Some(label));
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                let pixel = image.get_pixel_mut(x, y);
                for c in 0..3 {
                    let blended = (1.0 - OVERLAY_ALPHA) * pixel[c] as f32
                        + OVERLAY_ALPHA * color[c] as f32;
                    pixel[c] = blended.round() as u8;
                }
            }
        }
    }
    Ok(image)
}

/// Outline the tumor front over a pyramid level.
///
/// Tumor and stroma tiles are painted into a mask at level resolution, which
/// is closed and then opened with a 3x3 kernel. Outer regions above
/// 0.05% of the level area are shaded red at 30% and edged in solid red.
pub fn render_tumor_front(
    source: &dyn PyramidSource,
    grid: &ClassificationGrid,
    extract_size: u32,
    level: usize,
) -> Result<RgbImage, SlideError> {
    let info = source.level(level).ok_or(SlideError::InvalidLevel {
        level,
        level_count: source.level_count(),
    })?;
    let mut image = source.read_level(level)?;
    let (width, height) = image.dimensions();
    let side = ((extract_size as f64 / info.downsample) as u32).max(1);

    let mut tumor = GrayImage::new(width, height);
    for (coord, label) in grid.iter() {
        if !matches!(label, Label::Tumor | Label::Stroma) || coord.x < 0 || coord.y < 0 {
            continue;
        }
        let x0 = (coord.x as f64 / info.downsample) as u32;
        let y0 = (coord.y as f64 / info.downsample) as u32;
        for y in y0..(y0 + side).min(height) {
            for x in x0..(x0 + side).min(width) {
                tumor.put_pixel(x, y, Luma([255]));
            }
        }
    }
    let tumor = open(&close(&tumor, Norm::LInf, 1), Norm::LInf, 1);

    let min_area = (width as f64 * height as f64) * FRONT_MIN_AREA_FRACTION;
    let mut regions = GrayImage::new(width, height);
    let mut kept = 0usize;
    for contour in find_contours::<i32>(&tumor) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        if polygon_area(&contour.points) > min_area {
            fill_contour(&mut regions, &contour.points);
            kept += 1;
        }
    }
    debug!(regions = kept, level, "Tumor front traced");

    let interior = erode(&regions, Norm::LInf, FRONT_EDGE_WIDTH);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if regions.get_pixel(x, y)[0] == 0 {
            continue;
        }
        if interior.get_pixel(x, y)[0] == 0 {
            *pixel = TUMOR_COLOR;
            continue;
        }
        for c in 0..3 {
            let blended =
                (1.0 - FRONT_ALPHA) * pixel[c] as f32 + FRONT_ALPHA * TUMOR_COLOR[c] as f32;
            pixel[c] = blended.round() as u8;
        }
    }
    Ok(image)
}

/// Write an image as PNG.
pub fn save_png(image: &RgbImage, path: impl AsRef<Path>) -> Result<(), IoError> {
    let path = path.as_ref();
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => IoError::from_std(path, io),
            other => IoError::Os {
                path: path.display().to_string(),
                message: other.to_string(),
            },
        })
}
