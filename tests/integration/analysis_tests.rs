//! Analysis integration tests: prediction tables on disk through denoising,
//! whole-slide ratio and hotspot search.

use tsr_analyzer::config::AnalysisConfig;
use tsr_analyzer::denoise::Denoiser;
use tsr_analyzer::error::{AnalysisError, TableError};
use tsr_analyzer::grid::{ClassificationGrid, GridIndex, Label, PredictionTable, TileCoord};
use tsr_analyzer::render::{render_hotspot, save_png, TUMOR_COLOR};
use tsr_analyzer::slide::SlideProperties;
use tsr_analyzer::tsr::{radius_grid, whole_slide_ratio, TsrAnalyzer};

use super::test_utils::temp_file;

const STEP: i64 = 256;

fn props() -> SlideProperties {
    SlideProperties {
        mpp: 0.25,
        magnification: 40.0,
    }
}

/// CSV for a `rows x cols` grid labeled by `f(row, col)`.
fn table_csv(rows: i64, cols: i64, f: impl Fn(i64, i64) -> u8) -> String {
    let mut csv = String::from("patch,class,prob_0,prob_1,prob_2\n");
    for r in 0..rows {
        for c in 0..cols {
            let class = f(r, c);
            let mut probs = [0.0; 3];
            probs[class as usize] = 1.0;
            csv.push_str(&format!(
                "{}_{},{},{},{},{}\n",
                r * STEP,
                c * STEP,
                class,
                probs[0],
                probs[1],
                probs[2]
            ));
        }
    }
    csv
}

#[test]
fn test_singleton_center_relabeled() {
    let mut grid: ClassificationGrid = (0..5i64)
        .flat_map(|r| (0..5i64).map(move |c| (TileCoord::new(r, c), Label::Stroma)))
        .collect();
    grid.insert(TileCoord::new(2, 2), Label::Tumor);
    grid.set_step(1);

    Denoiser::default().run(&mut grid);
    assert_eq!(grid.get(&TileCoord::new(2, 2)), Some(Label::Stroma));
    assert_eq!(grid.len(), 25);
}

#[test]
fn test_two_by_two_ratio() {
    let grid: ClassificationGrid = [
        (TileCoord::new(0, 0), Label::Tumor),
        (TileCoord::new(0, 1), Label::Tumor),
        (TileCoord::new(1, 0), Label::Stroma),
        (TileCoord::new(1, 1), Label::Stroma),
    ]
    .into_iter()
    .collect();
    assert_eq!(whole_slide_ratio(&grid), 50.0);
    assert_eq!(whole_slide_ratio(&ClassificationGrid::new(1)), 0.0);
}

#[test]
fn test_radius_scales_with_mpp() {
    let r1 = radius_grid(2.0, 0.25, 40.0, 256, 40.0).unwrap();
    let r2 = radius_grid(2.0, 0.5, 40.0, 256, 40.0).unwrap();
    assert!((r1 - 2.0 * r2).abs() < 1e-12);
    assert!((r1 - 15.625).abs() < 1e-12);
    assert!(matches!(
        radius_grid(2.0, 0.0, 40.0, 256, 40.0),
        Err(AnalysisError::InvalidMpp(_))
    ));
}

#[test]
fn test_table_file_end_to_end() {
    // Tumor everywhere except a 12x12 stroma island; one tumor speck inside
    // the island and one stroma speck in the tumor.
    let csv = table_csv(60, 60, |r, c| {
        let island = (24..36).contains(&r) && (24..36).contains(&c);
        match (r, c) {
            (30, 30) => 2,
            (5, 5) => 1,
            _ if island => 1,
            _ => 2,
        }
    });
    let input = temp_file("end_to_end.csv", csv.as_bytes());
    let denoised = input.with_file_name("end_to_end_denoised.csv");

    let mut config = AnalysisConfig::default();
    config.hotspot.diameter_mm = 1.0;
    config.hotspot.step = 2;
    let analysis = TsrAnalyzer::new(config)
        .analyze_file("case", &input, props(), Some(&denoised))
        .unwrap();

    let report = &analysis.report;
    assert_eq!(report.tile_count, 3600);
    assert_eq!(report.stroma_count, 144);
    assert_eq!(report.tumor_count, 3600 - 144);
    let hotspot = report.hotspot.as_ref().unwrap();
    assert!(hotspot.ratio > report.tsr);
    assert!(hotspot.ratio <= 100.0);

    let written = PredictionTable::read(&denoised).unwrap();
    assert_eq!(written.len(), 3600);
    let speck = written
        .records
        .iter()
        .find(|r| r.coord == TileCoord::new(30 * STEP, 30 * STEP))
        .unwrap();
    assert_eq!(speck.label, Label::Stroma);
    assert_eq!(speck.probabilities.len(), 3);

    let png = input.with_file_name("end_to_end_hotspot.png");
    let image = render_hotspot(&analysis.index, Some(hotspot), 4);
    save_png(&image, &png).unwrap();
    let reloaded = image::open(&png).unwrap().to_rgb8();
    assert_eq!(reloaded.dimensions(), (240, 240));
    assert_eq!(reloaded.get_pixel(1, 1), &TUMOR_COLOR);
}

#[test]
fn test_missing_table_is_reported() {
    let result = TsrAnalyzer::default().analyze_file(
        "case",
        std::path::Path::new("/nonexistent/tsr/predictions.csv"),
        props(),
        None,
    );
    assert!(matches!(
        result,
        Err(AnalysisError::Table(TableError::MissingClassificationData { .. }))
    ));
}

#[test]
fn test_index_collapses_sparse_rows() {
    let grid: ClassificationGrid = [
        (TileCoord::new(0, 0), Label::Tumor),
        (TileCoord::new(0, 512), Label::Stroma),
        (TileCoord::new(1024, 0), Label::Other),
    ]
    .into_iter()
    .collect();
    let index = GridIndex::build(&grid);
    assert_eq!(index.dim(), (2, 2));
    assert_eq!(index.get(0, 1), Some(Label::Stroma));
    assert_eq!(index.get(1, 1), None);
}
