//! Per-slide orchestration.
//!
//! ```text
//! open_slide ─► TissueMask ─► TileGrid ─► read + resample (parallel)
//!                                              │
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!              optional TileSink      near-blank? ── yes ─► dropped
//!                                              │ no
//!                                              ▼
//!                                         Classifier
//!                                              │
//!                                              ▼
//!                  PredictionTable ─► TsrAnalyzer ─► TsrReport
//! ```
//!
//! [`SlidePipeline::run_batch`] processes several slides; a failing slide is
//! logged and reported without stopping the others.
//!
//! When predictions already exist on disk, [`AnalyzeRequest`] runs only the
//! analysis half: read the table, denoise, ratio and hotspot.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use image::{imageops, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{PipelineError, SlideError};
use crate::grid::{Label, PredictionRecord, PredictionTable, TileCoord};
use crate::slide::{
    open_slide, PyramidSource, SlideProperties, DEFAULT_OBJECTIVE_POWER, PROPERTY_MPP_X,
};
use crate::tile::{TileExtractor, TileGrid, TileSink};
use crate::tissue::TissueMask;
use crate::tsr::{TsrAnalysis, TsrAnalyzer};

// =============================================================================
// Classifier seam
// =============================================================================

/// Output of a classifier for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Per-class probabilities, in class order; may be empty
    pub probabilities: Vec<f64>,
}

impl Prediction {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            probabilities: Vec::new(),
        }
    }
}

/// Maps a tile image to a tissue class.
///
/// Called concurrently from the extraction workers.
pub trait Classifier: Send + Sync {
    fn classify(&self, tile: &RgbImage) -> Result<Prediction, String>;
}

/// True when the mean gray level of `tile` exceeds `threshold`.
pub fn is_near_blank(tile: &RgbImage, threshold: f64) -> bool {
    let gray = imageops::grayscale(tile);
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return true;
    }
    let sum: u64 = pixels.iter().map(|&v| v as u64).sum();
    sum as f64 / pixels.len() as f64 > threshold
}

// =============================================================================
// Pipeline
// =============================================================================

/// Everything produced for one slide.
#[derive(Debug, Clone)]
pub struct SlideOutcome {
    /// Prediction table after denoising
    pub table: PredictionTable,
    pub analysis: TsrAnalysis,
}

/// Result of one slide of a batch.
#[derive(Debug)]
pub struct SlideResult {
    pub slide: PathBuf,
    pub outcome: Result<SlideOutcome, PipelineError>,
}

/// Slide name used in reports: the file stem.
pub fn slide_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs tissue detection, tiling, classification and ratio analysis.
pub struct SlidePipeline {
    config: AnalysisConfig,
    classifier: Arc<dyn Classifier>,
    tile_sink: Option<Arc<dyn TileSink>>,
}

impl SlidePipeline {
    pub fn new(config: AnalysisConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            classifier,
            tile_sink: None,
        }
    }

    /// Also hand every extracted tile (blank or not) to `sink`.
    pub fn with_tile_sink(mut self, sink: Arc<dyn TileSink>) -> Self {
        self.tile_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Classify every tissue tile of `source`.
    ///
    /// An empty tissue mask yields an empty table.
    pub fn classify_slide(
        &self,
        source: &dyn PyramidSource,
    ) -> Result<PredictionTable, PipelineError> {
        let tiling = &self.config.tiling;
        let mask = TissueMask::detect(source, tiling)?;
        if mask.is_empty() {
            warn!("Empty tissue mask; no tiles extracted");
            return Ok(PredictionTable::default());
        }

        let dimensions = source.dimensions(0).ok_or(SlideError::InvalidLevel {
            level: 0,
            level_count: source.level_count(),
        })?;
        let extractor = TileExtractor::new(source, tiling)?;
        let grid = TileGrid::new(&mask, extractor.extract_size(), dimensions);
        let origins = grid.origins();
        info!(
            tiles = origins.len(),
            extract_size = extractor.extract_size(),
            "Tiles accepted on tissue"
        );

        let records = origins
            .par_iter()
            .map(|&origin| self.classify_tile(&extractor, origin))
            .collect::<Result<Vec<_>, _>>()?;
        let records: Vec<PredictionRecord> = records.into_iter().flatten().collect();

        info!(
            classified = records.len(),
            blank = origins.len() - records.len(),
            "Tiles classified"
        );
        Ok(PredictionTable::new(records))
    }

    fn classify_tile(
        &self,
        extractor: &TileExtractor<'_>,
        origin: TileCoord,
    ) -> Result<Option<PredictionRecord>, PipelineError> {
        let tile = extractor.read_tile(origin)?;
        if let Some(sink) = &self.tile_sink {
            sink.write(origin, &tile)?;
        }
        if is_near_blank(&tile, self.config.tiling.blank_threshold) {
            return Ok(None);
        }

        let prediction =
            self.classifier
                .classify(&tile)
                .map_err(|message| PipelineError::Classifier {
                    key: origin.to_string(),
                    message,
                })?;
        Ok(Some(
            PredictionRecord::new(origin, prediction.label)
                .with_probabilities(prediction.probabilities),
        ))
    }

    /// Classify and analyze an already opened slide.
    pub fn run_source(
        &self,
        name: &str,
        source: &dyn PyramidSource,
    ) -> Result<SlideOutcome, PipelineError> {
        let properties = SlideProperties::from_source(source)?;
        let mut table = self.classify_slide(source)?;
        let analysis =
            TsrAnalyzer::new(self.config.clone()).analyze_table(name, &mut table, properties)?;
        Ok(SlideOutcome { table, analysis })
    }

    /// Open a slide file and run the whole pipeline on it.
    pub fn run(&self, path: impl AsRef<Path>) -> Result<SlideOutcome, PipelineError> {
        let path = path.as_ref();
        let source = open_slide(path)?;
        self.run_source(&slide_name(path), source.as_ref())
    }

    /// Run every slide in turn; failures are isolated per slide.
    pub fn run_batch<P: AsRef<Path>>(&self, slides: &[P]) -> Vec<SlideResult> {
        slides
            .iter()
            .map(|slide| {
                let slide = slide.as_ref().to_path_buf();
                let outcome = self.run(&slide);
                match &outcome {
                    Ok(o) => info!(
                        slide = %slide.display(),
                        tsr = o.analysis.report.tsr,
                        tsr_hotspot = o.analysis.report.tsr_hotspot,
                        "Slide analyzed"
                    ),
                    Err(e) => error!(slide = %slide.display(), error = %e, "Slide failed"),
                }
                SlideResult { slide, outcome }
            })
            .collect()
    }
}

// =============================================================================
// Analysis of stored predictions
// =============================================================================

/// Join a relative `path` onto `root`.
///
/// `None` for empty or absolute paths and for any `..` component.
pub fn resolve_under(root: &Path, path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let relative = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    relative.then(|| root.join(path))
}

/// Analysis of a prediction table already on disk.
///
/// Slide properties come from `slide` when given; `mpp` and `magnification`
/// override them. Without a slide, `mpp` is required and the magnification
/// defaults to 40x.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub predictions: PathBuf,
    #[serde(default)]
    pub slide: Option<PathBuf>,
    #[serde(default)]
    pub mpp: Option<f64>,
    #[serde(default)]
    pub magnification: Option<f64>,
    /// Report name; defaults to the slide or table file stem
    #[serde(default)]
    pub name: Option<String>,
    /// Where to write the denoised table; never taken from a request body
    #[serde(skip)]
    pub denoised_out: Option<PathBuf>,
    /// Overrides the analyzer defaults
    #[serde(default)]
    pub config: Option<AnalysisConfig>,
}

impl AnalyzeRequest {
    pub fn new(predictions: impl Into<PathBuf>) -> Self {
        Self {
            predictions: predictions.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.slide.is_none() && self.mpp.is_none() {
            return Err("either a slide or an explicit mpp is required".to_string());
        }
        match &self.config {
            Some(config) => config.validate(),
            None => Ok(()),
        }
    }

    pub fn slide_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            slide_name(self.slide.as_deref().unwrap_or(&self.predictions))
        })
    }

    /// Resolve `predictions` and `slide` under `root`.
    ///
    /// On failure, returns the first path that is absolute or would leave
    /// `root`.
    pub fn confine_to(mut self, root: &Path) -> Result<Self, PathBuf> {
        self.predictions = resolve_under(root, &self.predictions)
            .ok_or_else(|| self.predictions.clone())?;
        if let Some(slide) = self.slide.take() {
            self.slide = Some(resolve_under(root, &slide).ok_or(slide)?);
        }
        Ok(self)
    }

    /// Resolve mpp and magnification.
    pub fn properties(&self) -> Result<SlideProperties, PipelineError> {
        let (slide_mpp, slide_magnification) = match &self.slide {
            Some(path) => {
                let source = open_slide(path)?;
                (Some(source.mpp()), Some(source.objective_power()?))
            }
            None => (None, None),
        };

        let mpp = match (self.mpp, slide_mpp) {
            (Some(mpp), _) => mpp,
            (None, Some(from_slide)) => from_slide?,
            (None, None) => return Err(SlideError::MissingProperty(PROPERTY_MPP_X).into()),
        };
        let magnification = self
            .magnification
            .or(slide_magnification)
            .unwrap_or(DEFAULT_OBJECTIVE_POWER);
        Ok(SlideProperties { mpp, magnification })
    }

    /// Run the analysis; `defaults` applies when the request carries no config.
    pub fn run(&self, defaults: &AnalysisConfig) -> Result<TsrAnalysis, PipelineError> {
        let properties = self.properties()?;
        let config = self.config.clone().unwrap_or_else(|| defaults.clone());
        let analysis = TsrAnalyzer::new(config).analyze_file(
            &self.slide_name(),
            &self.predictions,
            properties,
            self.denoised_out.as_deref(),
        )?;
        Ok(analysis)
    }
}
