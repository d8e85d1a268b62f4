//! End-to-end ratio analysis of one classification grid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::denoise::{DenoiseStats, Denoiser};
use crate::error::AnalysisError;
use crate::grid::{ClassificationGrid, GridIndex, PredictionTable};
use crate::slide::SlideProperties;

use super::hotspot::{radius_grid, HotspotResult, HotspotSearch};
use super::ratio::RatioCounts;

/// Result record of one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsrReport {
    pub slide: String,
    /// Whole-slide stroma percentage
    pub tsr: f64,
    /// Hotspot stroma percentage, 0 when no hotspot was found
    pub tsr_hotspot: f64,
    pub hotspot: Option<HotspotResult>,
    pub stroma_count: usize,
    pub tumor_count: usize,
    pub tile_count: usize,
}

/// Everything produced by [`TsrAnalyzer::analyze`].
#[derive(Debug, Clone)]
pub struct TsrAnalysis {
    pub report: TsrReport,
    /// Denoised grid
    pub grid: ClassificationGrid,
    /// Dense view of the denoised grid
    pub index: GridIndex,
    pub denoise: DenoiseStats,
}

/// Denoise, then compute the whole-slide ratio and the hotspot.
#[derive(Debug, Clone, Default)]
pub struct TsrAnalyzer {
    config: AnalysisConfig,
}

impl TsrAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        slide: &str,
        mut grid: ClassificationGrid,
        properties: SlideProperties,
    ) -> Result<TsrAnalysis, AnalysisError> {
        let tiling = &self.config.tiling;
        let radius = radius_grid(
            self.config.hotspot.diameter_mm,
            properties.mpp,
            properties.magnification,
            tiling.tile_size,
            tiling.base_magnification,
        )?;

        grid.set_step(tiling.extract_size(properties.magnification) as i64);
        let denoise = Denoiser::new(self.config.denoise.clone()).run(&mut grid);

        let counts = RatioCounts::from_grid(&grid);
        let tsr = counts.percentage();
        if counts.total() == 0 {
            warn!(slide, "No stroma or tumor tiles; whole-slide TSR set to 0");
        }
        info!(
            slide,
            stroma = counts.stroma,
            tumor = counts.tumor,
            tsr,
            "Whole-slide TSR"
        );

        let index = GridIndex::build(&grid);
        let hotspot = HotspotSearch::new(&index, radius, &self.config.hotspot).run();
        match &hotspot {
            Some(h) => info!(
                slide,
                row = h.center.0,
                col = h.center.1,
                radius = h.radius,
                tsr = h.ratio,
                "Hotspot found"
            ),
            None => warn!(slide, "No suitable hotspot found"),
        }

        let report = TsrReport {
            slide: slide.to_string(),
            tsr,
            tsr_hotspot: hotspot.as_ref().map_or(0.0, |h| h.ratio),
            hotspot,
            stroma_count: counts.stroma,
            tumor_count: counts.tumor,
            tile_count: grid.len(),
        };

        Ok(TsrAnalysis {
            report,
            grid,
            index,
            denoise,
        })
    }

    /// Analyze a prediction table and write the denoised labels back into it.
    pub fn analyze_table(
        &self,
        slide: &str,
        table: &mut PredictionTable,
        properties: SlideProperties,
    ) -> Result<TsrAnalysis, AnalysisError> {
        let analysis = self.analyze(slide, table.to_grid(), properties)?;
        table.apply_grid(&analysis.grid);
        Ok(analysis)
    }

    /// Load a prediction table from disk, analyze it, and optionally persist
    /// the denoised table.
    pub fn analyze_file(
        &self,
        slide: &str,
        predictions: &Path,
        properties: SlideProperties,
        denoised_out: Option<&Path>,
    ) -> Result<TsrAnalysis, AnalysisError> {
        let mut table = PredictionTable::read(predictions)?;
        let analysis = self.analyze_table(slide, &mut table, properties)?;
        if let Some(path) = denoised_out {
            table.write(path)?;
        }
        Ok(analysis)
    }
}
