//! # TSR Analyzer
//!
//! Tumor-stroma ratio (TSR) analysis for Whole Slide Images.
//!
//! A slide is cut into tiles on its tissue, an external classifier labels
//! every tile, and the resulting classification grid is cleaned and searched
//! for the most stroma-rich circle sitting on a tumor front.
//!
//! ## Architecture
//!
//! ```text
//! PyramidSource ─► TissueMask ─► TileGrid ─► (Classifier) ─► ClassificationGrid
//!                                                                  │
//!                       TsrReport ◄── HotspotSearch ◄── Denoiser ◄─┘
//! ```
//!
//! - [`io`] - Byte-range readers over local files and buffers
//! - [`slide`] - SVS / pyramidal TIFF reader and in-memory pyramids
//! - [`tissue`] - Tissue mask on the lowest pyramid level
//! - [`tile`] - Tissue-aware tile walk and parallel extraction
//! - [`grid`] - Tile coordinates, labels, dense index and prediction table
//! - [`denoise`] - Neighbor majority and small component merging
//! - [`tsr`] - Whole-slide ratio, hotspot search and reports
//! - [`render`] - Hotspot map, prediction overlay and tumor front images
//! - [`pipeline`] - Per-slide orchestration and batch processing
//! - [`server`] - Axum-based analysis job service
//! - [`config`] - Analysis settings and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tsr_analyzer::{AnalysisConfig, AnalyzeRequest};
//!
//! let mut request = AnalyzeRequest::new("predictions.csv");
//! request.mpp = Some(0.25);
//! let analysis = request.run(&AnalysisConfig::default()).unwrap();
//! println!("TSR {:.1}%, hotspot {:.1}%", analysis.report.tsr, analysis.report.tsr_hotspot);
//! ```

pub mod config;
pub mod denoise;
pub mod error;
pub mod grid;
pub mod io;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod slide;
pub mod tile;
pub mod tissue;
pub mod tsr;

// Re-export commonly used types
pub use config::{
    AnalysisConfig, AnalyzeConfig, Cli, Command, DenoiseConfig, HotspotConfig, ServeConfig,
    TilesConfig, TilingConfig,
};
pub use denoise::{merge_small_components, neighbor_majority, DenoiseStats, Denoiser};
pub use error::{
    AnalysisError, IoError, PipelineError, SlideError, TableError, TiffError, TileError,
};
pub use grid::{
    ClassificationGrid, GridIndex, Label, PredictionRecord, PredictionTable, TileCoord, NO_DATA,
};
pub use io::{FileRangeReader, MemoryRangeReader, RangeReader};
pub use pipeline::{
    is_near_blank, AnalyzeRequest, Classifier, Prediction, SlideOutcome, SlidePipeline,
    SlideResult,
};
pub use render::{render_hotspot, render_overlay, render_tumor_front, save_png};
pub use server::{create_router, AppState, JobQueue, JobStatus, RouterConfig};
pub use slide::{
    open_slide, ImagePyramid, PyramidLevel, PyramidSource, SlideProperties, SvsSlide,
};
pub use tile::{DirectorySink, MemorySink, TileExtractor, TileGrid, TileSink};
pub use tissue::{TissueMask, TissueRect};
pub use tsr::{
    radius_grid, whole_slide_ratio, HotspotResult, HotspotSearch, RatioCounts, TsrAnalysis,
    TsrAnalyzer, TsrReport,
};
