//! Tumor-stroma ratio: whole-slide ratio, circular hotspot search, and the
//! analysis that ties denoising and both ratios into one report.

mod hotspot;
mod ratio;
mod report;

pub use hotspot::{radius_grid, HotspotResult, HotspotSearch};
pub use ratio::{whole_slide_ratio, RatioCounts};
pub use report::{TsrAnalysis, TsrAnalyzer, TsrReport};
