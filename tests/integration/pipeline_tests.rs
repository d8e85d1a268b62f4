//! End-to-end pipeline tests on synthetic SVS files.

use std::sync::Arc;

use tsr_analyzer::config::AnalysisConfig;
use tsr_analyzer::grid::Label;
use tsr_analyzer::pipeline::SlidePipeline;
use tsr_analyzer::render::{render_overlay, render_tumor_front, TUMOR_COLOR};
use tsr_analyzer::slide::{open_slide, PyramidSource};
use tsr_analyzer::tile::{DirectorySink, TileExtractor, TileGrid};
use tsr_analyzer::tissue::TissueMask;

use super::test_utils::{pyramid_levels, temp_file, tissue_image, ColorClassifier, SvsBuilder};

/// 2048x2048 slide at 40x, tumor on the left of the tissue block, stroma on
/// the right. Lowest level is 128x128.
fn write_slide(name: &str) -> std::path::PathBuf {
    let base = tissue_image(2048, 2048, (512, 512, 1536, 1536), 1024);
    let bytes = SvsBuilder::new(pyramid_levels(&base, 4, 100), 256)
        .with_aperio(40.0, 0.25)
        .build();
    temp_file(name, &bytes)
}

fn config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.tiling.tile_size = 128;
    config
}

#[test]
fn test_tiles_on_tissue_only() {
    let path = write_slide("tiles.svs");
    let slide = open_slide(&path).unwrap();
    let tiling = config().tiling;

    let mask = TissueMask::detect(slide.as_ref(), &tiling).unwrap();
    assert!(!mask.is_empty());
    let extractor = TileExtractor::new(slide.as_ref(), &tiling).unwrap();
    assert_eq!(extractor.extract_size(), 128);

    let grid = TileGrid::new(&mask, extractor.extract_size(), slide.dimensions(0).unwrap());
    let origins = grid.origins();
    assert!(!origins.is_empty());
    for origin in &origins {
        let (cx, cy) = (origin.x + 64, origin.y + 64);
        assert!((448..1600).contains(&cx), "tile center {} off tissue", cx);
        assert!((448..1600).contains(&cy), "tile center {} off tissue", cy);
    }

    let out = path.with_file_name("tiles_out");
    let sink = DirectorySink::create(&out).unwrap();
    let summary = extractor.extract_to(&grid, &sink).unwrap();
    assert_eq!(summary.tiles, origins.len());
    assert!(sink.path_for(origins[0]).exists());
    let _ = std::fs::remove_dir_all(out);
}

#[test]
fn test_pipeline_run_reports_mixed_ratio() {
    let path = write_slide("pipeline.svs");
    let classifier = Arc::new(ColorClassifier::new());
    let pipeline = SlidePipeline::new(config(), classifier.clone());

    let outcome = pipeline.run(&path).unwrap();
    let report = &outcome.analysis.report;
    assert_eq!(report.slide, "pipeline");
    assert_eq!(classifier.calls(), outcome.table.len());
    assert!(report.stroma_count > 0);
    assert!(report.tumor_count > 0);
    assert!(report.tsr > 20.0 && report.tsr < 80.0, "tsr {}", report.tsr);

    // Tumor tiles sit left of the split, stroma tiles right of it
    for record in &outcome.table.records {
        match record.label {
            Label::Tumor => assert!(record.coord.x < 1024),
            Label::Stroma => assert!(record.coord.x + 128 > 1024),
            _ => {}
        }
    }
}

#[test]
fn test_overlay_of_pipeline_result() {
    let path = write_slide("overlay.svs");
    let pipeline = SlidePipeline::new(config(), Arc::new(ColorClassifier::new()));
    let outcome = pipeline.run(&path).unwrap();

    let slide = open_slide(&path).unwrap();
    let level = slide.level_count() - 1;
    let overlay = render_overlay(
        slide.as_ref(),
        &outcome.analysis.grid,
        outcome.analysis.grid.step() as u32,
        level,
    )
    .unwrap();
    assert_eq!(Some(overlay.dimensions()), slide.dimensions(level));

    let front = render_tumor_front(
        slide.as_ref(),
        &outcome.analysis.grid,
        outcome.analysis.grid.step() as u32,
        level,
    )
    .unwrap();
    assert_eq!(Some(front.dimensions()), slide.dimensions(level));
    assert!(front.pixels().any(|p| p == &TUMOR_COLOR));
    // Slide corner is background, far from any tile
    assert_ne!(front.get_pixel(2, 2), &TUMOR_COLOR);
}

#[test]
fn test_batch_continues_after_failure() {
    let good = write_slide("batch_good.svs");
    let bad = temp_file("batch_bad.svs", b"not a tiff at all");
    let pipeline = SlidePipeline::new(config(), Arc::new(ColorClassifier::new()));

    let results = pipeline.run_batch(&[bad.clone(), good.clone()]);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].slide, bad);
    assert!(results[0].outcome.is_err());
    assert!(results[1].outcome.is_ok());
}
