//! In-memory pyramid built from an ordinary raster image.
//!
//! Useful for scanned fields of view exported as PNG/JPEG, for tests, and for
//! callers that already hold a decoded slide. Lower levels are generated by
//! area-averaging the base image by a fixed factor until the image becomes
//! small.

use std::collections::HashMap;
use std::path::Path;

use image::{imageops, RgbImage};

use crate::error::{IoError, SlideError};

use super::blank_region;
use super::source::{PyramidLevel, PyramidSource};

/// Default factor between consecutive generated levels.
pub const DEFAULT_LEVEL_FACTOR: u32 = 4;

/// Levels stop being generated once the next one would be smaller than this.
pub const MIN_LEVEL_DIMENSION: u32 = 256;

/// A multi-resolution image held entirely in memory.
pub struct ImagePyramid {
    levels: Vec<RgbImage>,
    infos: Vec<PyramidLevel>,
    properties: HashMap<String, String>,
}

impl ImagePyramid {
    /// Build a pyramid with the default level factor.
    pub fn new(base: RgbImage) -> Self {
        Self::with_levels(base, DEFAULT_LEVEL_FACTOR, MIN_LEVEL_DIMENSION)
    }

    /// Build a pyramid, downsampling by `factor` while the longer side of the
    /// next level stays at or above `min_dimension`.
    pub fn with_levels(base: RgbImage, factor: u32, min_dimension: u32) -> Self {
        let factor = factor.max(2);
        let mut levels = vec![base];

        loop {
            let last = &levels[levels.len() - 1];
            let (w, h) = (last.width() / factor, last.height() / factor);
            if w == 0 || h == 0 || w.max(h) < min_dimension {
                break;
            }
            let next = imageops::thumbnail(last, w, h);
            levels.push(next);
        }

        Self::from_levels(levels)
    }

    /// Wrap pre-computed levels, largest first.
    pub fn from_levels(levels: Vec<RgbImage>) -> Self {
        let (base_w, base_h) = levels
            .first()
            .map(|img| img.dimensions())
            .unwrap_or((0, 0));

        let infos = levels
            .iter()
            .enumerate()
            .map(|(index, img)| {
                let (w, h) = img.dimensions();
                // Average of both axes, the same estimate scanners report.
                let downsample = if w == 0 || h == 0 {
                    1.0
                } else {
                    (base_w as f64 / w as f64 + base_h as f64 / h as f64) / 2.0
                };
                PyramidLevel {
                    index,
                    width: w,
                    height: h,
                    downsample,
                }
            })
            .collect();

        Self {
            levels,
            infos,
            properties: HashMap::new(),
        }
    }

    /// Decode an image file and build a pyramid from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(io) => SlideError::Io(IoError::from_std(path, io)),
            other => SlideError::Decode {
                message: other.to_string(),
            },
        })?;
        Ok(Self::new(img.to_rgb8()))
    }

    /// Attach a metadata property (e.g. objective power or mpp).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl PyramidSource for ImagePyramid {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level(&self, index: usize) -> Option<PyramidLevel> {
        self.infos.get(index).copied()
    }

    fn read_region(
        &self,
        origin: (u32, u32),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, SlideError> {
        let (img, info) = match (self.levels.get(level), self.infos.get(level)) {
            (Some(img), Some(info)) => (img, info),
            _ => {
                return Err(SlideError::InvalidLevel {
                    level,
                    level_count: self.levels.len(),
                })
            }
        };

        let x = (origin.0 as f64 / info.downsample).floor() as i64;
        let y = (origin.1 as f64 / info.downsample).floor() as i64;

        let mut region = blank_region(size.0, size.1);
        imageops::replace(&mut region, img, -x, -y);
        Ok(region)
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }
}
