//! Slide access layer.
//!
//! Everything that needs pixels from a Whole Slide Image goes through the
//! [`PyramidSource`] trait:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │   tissue mask · tile extraction · hotspot     │
//! └───────────────────────┬───────────────────────┘
//!                         │
//!                         ▼
//! ┌───────────────────────────────────────────────┐
//! │              PyramidSource trait              │
//! │  levels, downsamples, read_region, properties │
//! └───────────────────────┬───────────────────────┘
//!                         │
//!           ┌─────────────┴─────────────┐
//!           ▼                           ▼
//! ┌──────────────────┐        ┌──────────────────┐
//! │     SvsSlide     │        │   ImagePyramid   │
//! │ (SVS, tiled TIFF)│        │ (PNG/JPEG, tests)│
//! └──────────────────┘        └──────────────────┘
//! ```
//!
//! [`open_slide`] picks the implementation from the file extension.

mod memory;
mod source;
mod svs;
pub mod tiff;

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::error::SlideError;

pub use memory::{ImagePyramid, DEFAULT_LEVEL_FACTOR, MIN_LEVEL_DIMENSION};
pub use source::{
    PyramidLevel, PyramidSource, SlideProperties, DEFAULT_OBJECTIVE_POWER,
    PROPERTY_MPP_X, PROPERTY_OBJECTIVE_POWER, PROPERTY_VENDOR,
};
pub use svs::{
    merge_jpeg_tables, SvsMetadata, SvsSlide, DEFAULT_TILE_CACHE_CAPACITY, PROPERTY_COMMENT,
};

/// Extensions opened with the tiled TIFF reader.
const TIFF_EXTENSIONS: &[&str] = &["svs", "tif", "tiff"];

/// Extensions decoded whole into an in-memory pyramid.
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A white canvas; slide background outside the scanned area is white.
pub(crate) fn blank_region(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
}

/// Open a slide file, choosing the reader by extension.
pub fn open_slide(path: impl AsRef<Path>) -> Result<Box<dyn PyramidSource>, SlideError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if TIFF_EXTENSIONS.contains(&extension.as_str()) {
        Ok(Box::new(SvsSlide::open(path)?))
    } else if RASTER_EXTENSIONS.contains(&extension.as_str()) {
        Ok(Box::new(ImagePyramid::open(path)?))
    } else {
        Err(SlideError::UnsupportedFormat {
            reason: format!("unrecognized extension '{}' for {}", extension, path.display()),
        })
    }
}
