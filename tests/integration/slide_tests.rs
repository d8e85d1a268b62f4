//! Slide reading tests against synthetic tiled JPEG TIFF files.
//!
//! Tests verify:
//! - Pyramid structure (levels, dimensions, downsample factors)
//! - Aperio metadata exposed as slide properties
//! - Region reads across tile boundaries, edge padding and out-of-bounds areas
//! - Classic TIFF and BigTIFF layouts
//! - Extension-based dispatch in `open_slide`

use image::RgbImage;

use tsr_analyzer::error::{SlideError, TiffError};
use tsr_analyzer::io::MemoryRangeReader;
use tsr_analyzer::slide::{
    open_slide, PyramidSource, SlideProperties, SvsSlide, PROPERTY_VENDOR,
};

use super::test_utils::{mean_abs_diff, pyramid_levels, tissue_image, SvsBuilder, WHITE};

fn base_image() -> RgbImage {
    tissue_image(600, 400, (100, 80, 500, 320), 300)
}

fn svs_bytes(bigtiff: bool) -> Vec<u8> {
    SvsBuilder::new(pyramid_levels(&base_image(), 4, 16), 128)
        .with_aperio(20.0, 0.5)
        .with_bigtiff(bigtiff)
        .build()
}

fn open_memory(bytes: Vec<u8>) -> SvsSlide<MemoryRangeReader> {
    SvsSlide::from_reader(MemoryRangeReader::new(bytes, "memory://slide.svs")).unwrap()
}

// =============================================================================
// Structure
// =============================================================================

#[test]
fn test_levels_and_downsamples() {
    let slide = open_memory(svs_bytes(false));
    assert_eq!(slide.level_count(), 3);
    assert_eq!(slide.dimensions(0), Some((600, 400)));
    assert_eq!(slide.dimensions(1), Some((150, 100)));
    assert_eq!(slide.dimensions(2), Some((37, 25)));

    assert_eq!(slide.downsample(0), Some(1.0));
    assert_eq!(slide.downsample(1), Some(4.0));
    let ds2 = slide.downsample(2).unwrap();
    assert!((ds2 - (600.0 / 37.0 + 400.0 / 25.0) / 2.0).abs() < 1e-9);

    assert_eq!(slide.lowest_level().unwrap().index, 2);
    assert!(slide.level(3).is_none());
}

#[test]
fn test_aperio_properties() {
    let slide = open_memory(svs_bytes(false));
    assert_eq!(slide.property(PROPERTY_VENDOR).as_deref(), Some("aperio"));
    assert_eq!(slide.objective_power().unwrap(), 20.0);
    assert_eq!(slide.mpp().unwrap(), 0.5);

    let props = SlideProperties::from_source(&slide).unwrap();
    assert_eq!(props.magnification, 20.0);
    assert_eq!(props.mpp, 0.5);
}

#[test]
fn test_missing_mpp_without_description() {
    let bytes = SvsBuilder::new(pyramid_levels(&base_image(), 4, 64), 128).build();
    let slide = open_memory(bytes);
    assert_eq!(slide.objective_power().unwrap(), 40.0);
    assert!(matches!(slide.mpp(), Err(SlideError::MissingProperty(_))));
}

#[test]
fn test_bigtiff_layout() {
    let slide = open_memory(svs_bytes(true));
    assert_eq!(slide.level_count(), 3);
    assert_eq!(slide.mpp().unwrap(), 0.5);
    let region = slide.read_region((0, 0), 0, (600, 400)).unwrap();
    assert!(mean_abs_diff(&region, &base_image()) < 4.0);
}

// =============================================================================
// Region reads
// =============================================================================

#[test]
fn test_read_full_level_matches_source() {
    let slide = open_memory(svs_bytes(false));
    let full = slide.read_level(0).unwrap();
    assert_eq!(full.dimensions(), (600, 400));
    assert!(mean_abs_diff(&full, &base_image()) < 4.0);
}

#[test]
fn test_read_region_across_tiles() {
    let slide = open_memory(svs_bytes(false));
    let region = slide.read_region((250, 100), 0, (100, 60)).unwrap();
    let expected = image::imageops::crop_imm(&base_image(), 250, 100, 100, 60).to_image();
    assert!(mean_abs_diff(&region, &expected) < 4.0);
}

#[test]
fn test_read_region_past_edge_is_white() {
    let slide = open_memory(svs_bytes(false));
    let region = slide.read_region((560, 360), 0, (80, 80)).unwrap();
    assert_eq!(region.dimensions(), (80, 80));
    // Beyond the 600x400 image, including tile padding, everything is white
    assert_eq!(region.get_pixel(60, 60), &WHITE);
    assert_eq!(region.get_pixel(45, 10), &WHITE);

    let outside = slide.read_region((5000, 5000), 0, (16, 16)).unwrap();
    assert!(outside.pixels().all(|p| p == &WHITE));
}

#[test]
fn test_read_region_lower_level() {
    let slide = open_memory(svs_bytes(false));
    let region = slide.read_region((400, 320), 1, (20, 10)).unwrap();
    assert_eq!(region.dimensions(), (20, 10));
    let levels = pyramid_levels(&base_image(), 4, 16);
    let expected = image::imageops::crop_imm(&levels[1], 100, 80, 20, 10).to_image();
    assert!(mean_abs_diff(&region, &expected) < 6.0);
}

#[test]
fn test_invalid_level() {
    let slide = open_memory(svs_bytes(false));
    assert!(matches!(
        slide.read_region((0, 0), 7, (4, 4)),
        Err(SlideError::InvalidLevel { level: 7, level_count: 3 })
    ));
}

// =============================================================================
// Errors and dispatch
// =============================================================================

#[test]
fn test_not_a_tiff() {
    let result = SvsSlide::from_reader(MemoryRangeReader::new(vec![0u8; 64], "junk"));
    assert!(matches!(
        result,
        Err(SlideError::Tiff(TiffError::InvalidMagic(_)))
    ));
}

#[test]
fn test_open_slide_by_extension() {
    let path = super::test_utils::temp_file("dispatch.svs", &svs_bytes(false));
    let slide = open_slide(&path).unwrap();
    assert_eq!(slide.level_count(), 3);
    assert_eq!(slide.objective_power().unwrap(), 20.0);

    let png = super::test_utils::temp_file("dispatch.png", &[]);
    image::RgbImage::from_pixel(300, 300, WHITE).save(&png).unwrap();
    let raster = open_slide(&png).unwrap();
    assert_eq!(raster.dimensions(0), Some((300, 300)));
}
