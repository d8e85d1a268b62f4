//! Configuration for the TSR analyzer.
//!
//! Two layers live here:
//! - Plain configuration values ([`AnalysisConfig`] and its sections) passed
//!   explicitly to the tissue, denoise and hotspot stages. Every value has a
//!   default matching the published analysis protocol.
//! - The command-line interface ([`Cli`]) built with clap. Every option can
//!   also be set through an environment variable with the `TSR_` prefix.
//!
//! # Environment Variables
//!
//! - `TSR_TILE_SIZE` - Classifier input side in pixels (default: 256)
//! - `TSR_DIAMETER_MM` - Hotspot circle diameter (default: 2.0)
//! - `TSR_HOTSPOT_STEP` - Lattice step between candidate centers (default: 5)
//! - `TSR_HOTSPOT_DELTA` - Boundary scan half-width (default: 1)
//! - `TSR_COMPONENT_THRESHOLD` - Max size of merged components (default: 5)
//! - `TSR_HOST` / `TSR_PORT` - Server bind address (default: 0.0.0.0:3000)
//! - `TSR_MAX_CONCURRENT` - Analyses running at once (default: 2)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

// =============================================================================
// Default Values
// =============================================================================

/// Side of the tiles fed to the classifier.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Magnification the tile size refers to.
pub const DEFAULT_BASE_MAGNIFICATION: f64 = 40.0;

/// Canny hysteresis thresholds used for tissue detection.
pub const DEFAULT_CANNY_LOW: f32 = 5.0;
pub const DEFAULT_CANNY_HIGH: f32 = 50.0;

/// Radius of the square closing element (3 iterations of a 3x3 kernel).
pub const DEFAULT_MORPH_RADIUS: u8 = 3;

/// Contours smaller than this fraction of the edge pixels are dropped.
pub const DEFAULT_CONTOUR_AREA_FRACTION: f64 = 0.02;

/// Tiles whose mean gray value exceeds this are treated as blank.
pub const DEFAULT_BLANK_THRESHOLD: f64 = 240.0;

/// Components with at most this many cells are merged into their surroundings.
pub const DEFAULT_COMPONENT_THRESHOLD: usize = 5;

/// Hotspot circle diameter in millimetres.
pub const DEFAULT_DIAMETER_MM: f64 = 2.0;

/// Half-width of the tumor boundary scan, in grid cells.
pub const DEFAULT_DELTA: usize = 1;

/// Distance between candidate hotspot centers, in grid cells.
pub const DEFAULT_HOTSPOT_STEP: usize = 5;

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default number of analyses running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default directory that API request paths are resolved under.
pub const DEFAULT_DATA_DIR: &str = ".";

// =============================================================================
// Analysis Configuration
// =============================================================================

/// Tissue detection and tile extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_size: u32,
    pub base_magnification: f64,
    pub canny_low: f32,
    pub canny_high: f32,
    pub morph_radius: u8,
    pub contour_area_fraction: f64,
    pub blank_threshold: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            base_magnification: DEFAULT_BASE_MAGNIFICATION,
            canny_low: DEFAULT_CANNY_LOW,
            canny_high: DEFAULT_CANNY_HIGH,
            morph_radius: DEFAULT_MORPH_RADIUS,
            contour_area_fraction: DEFAULT_CONTOUR_AREA_FRACTION,
            blank_threshold: DEFAULT_BLANK_THRESHOLD,
        }
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if !(self.base_magnification.is_finite() && self.base_magnification > 0.0) {
            return Err("base_magnification must be positive".to_string());
        }
        if self.canny_low < 0.0 || self.canny_high < self.canny_low {
            return Err("canny thresholds must satisfy 0 <= low <= high".to_string());
        }
        if !(0.0..=1.0).contains(&self.contour_area_fraction) {
            return Err("contour_area_fraction must be between 0 and 1".to_string());
        }
        if !(0.0..=255.0).contains(&self.blank_threshold) {
            return Err("blank_threshold must be between 0 and 255".to_string());
        }
        Ok(())
    }

    /// Full-resolution footprint of one tile at the given magnification.
    pub fn extract_size(&self, magnification: f64) -> u32 {
        extract_size(self.tile_size, magnification, self.base_magnification)
    }
}

/// `round(tile_size * magnification / base)`, never below one pixel.
pub fn extract_size(tile_size: u32, magnification: f64, base_magnification: f64) -> u32 {
    let scaled = (tile_size as f64 * magnification / base_magnification).round();
    if scaled.is_finite() && scaled >= 1.0 {
        scaled as u32
    } else {
        1
    }
}

/// Classification grid cleaning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Run the isolated-cell neighbor majority pass before component merging
    pub neighbor_majority: bool,
    pub component_threshold: usize,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            neighbor_majority: true,
            component_threshold: DEFAULT_COMPONENT_THRESHOLD,
        }
    }
}

impl DenoiseConfig {
    pub fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Circular hotspot search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    pub diameter_mm: f64,
    pub delta: usize,
    pub step: usize,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            diameter_mm: DEFAULT_DIAMETER_MM,
            delta: DEFAULT_DELTA,
            step: DEFAULT_HOTSPOT_STEP,
        }
    }
}

impl HotspotConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.diameter_mm.is_finite() && self.diameter_mm > 0.0) {
            return Err("diameter_mm must be positive".to_string());
        }
        if self.step == 0 {
            return Err("hotspot step must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// All settings of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub tiling: TilingConfig,
    pub denoise: DenoiseConfig,
    pub hotspot: HotspotConfig,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.tiling.validate()?;
        self.denoise.validate()?;
        self.hotspot.validate()
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// TSR Analyzer - tumor-stroma ratio analysis for Whole Slide Images.
#[derive(Parser, Debug, Clone)]
#[command(name = "tsr-analyzer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Detect tissue and write classifier-ready tiles as `{y}_{x}.png`.
    Tiles(TilesConfig),

    /// Denoise a prediction table and compute the whole-slide and hotspot TSR.
    Analyze(AnalyzeConfig),

    /// Run the HTTP analysis service.
    Serve(ServeConfig),
}

/// Analysis options shared by the subcommands.
#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// Classifier input side in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TSR_TILE_SIZE")]
    pub tile_size: u32,

    /// Hotspot circle diameter in millimetres.
    #[arg(long, default_value_t = DEFAULT_DIAMETER_MM, env = "TSR_DIAMETER_MM")]
    pub diameter_mm: f64,

    /// Distance between candidate hotspot centers, in grid cells.
    #[arg(long, default_value_t = DEFAULT_HOTSPOT_STEP, env = "TSR_HOTSPOT_STEP")]
    pub hotspot_step: usize,

    /// Half-width of the tumor boundary scan, in grid cells.
    #[arg(long, default_value_t = DEFAULT_DELTA, env = "TSR_HOTSPOT_DELTA")]
    pub hotspot_delta: usize,

    /// Components with at most this many cells are relabeled.
    #[arg(long, default_value_t = DEFAULT_COMPONENT_THRESHOLD, env = "TSR_COMPONENT_THRESHOLD")]
    pub component_threshold: usize,

    /// Skip the isolated-cell neighbor majority pass.
    #[arg(long, default_value_t = false)]
    pub no_neighbor_majority: bool,
}

impl AnalysisArgs {
    pub fn to_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            tiling: TilingConfig {
                tile_size: self.tile_size,
                ..TilingConfig::default()
            },
            denoise: DenoiseConfig {
                neighbor_majority: !self.no_neighbor_majority,
                component_threshold: self.component_threshold,
            },
            hotspot: HotspotConfig {
                diameter_mm: self.diameter_mm,
                delta: self.hotspot_delta,
                step: self.hotspot_step,
            },
        }
    }
}

/// Options of the `tiles` subcommand.
#[derive(Args, Debug, Clone)]
pub struct TilesConfig {
    /// Slide file (.svs, .tif, .tiff, .png, .jpg).
    pub slide: PathBuf,

    /// Directory receiving the tiles.
    #[arg(short, long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

/// Options of the `analyze` subcommand.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeConfig {
    /// Prediction table (CSV with `patch` and `class` columns).
    #[arg(short, long)]
    pub predictions: PathBuf,

    /// Slide file providing mpp and magnification.
    #[arg(short, long)]
    pub slide: Option<PathBuf>,

    /// Microns per pixel, overriding the slide metadata.
    #[arg(long)]
    pub mpp: Option<f64>,

    /// Objective magnification, overriding the slide metadata.
    #[arg(long)]
    pub magnification: Option<f64>,

    /// Write the denoised prediction table here.
    #[arg(long)]
    pub denoised_out: Option<PathBuf>,

    /// Render the cleaned grid and hotspot circle to this PNG.
    #[arg(long)]
    pub hotspot_png: Option<PathBuf>,

    /// Blend the cleaned labels over the slide's lowest level into this PNG.
    #[arg(long, requires = "slide")]
    pub overlay_png: Option<PathBuf>,

    /// Outline the tumor front over the slide's lowest level into this PNG.
    #[arg(long, requires = "slide")]
    pub tumor_front_png: Option<PathBuf>,

    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

impl AnalyzeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slide.is_none() && self.mpp.is_none() {
            return Err("Either --slide or --mpp is required to size the hotspot".to_string());
        }
        self.analysis.to_config().validate()
    }
}

/// Options of the `serve` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TSR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TSR_PORT")]
    pub port: u16,

    /// Maximum number of analyses running at once.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT, env = "TSR_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Directory holding prediction tables and slides. Paths in API requests
    /// are relative to it.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "TSR_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Allowed CORS origins (comma-separated). Any origin when unset.
    #[arg(long, env = "TSR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,

    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        if !self.data_dir.is_dir() {
            return Err(format!(
                "data directory {} does not exist",
                self.data_dir.display()
            ));
        }
        self.analysis.to_config().validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Tests
// =============================================================================
