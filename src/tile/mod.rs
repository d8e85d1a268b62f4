//! Tile layer: from a tissue mask to classifier-ready tiles.
//!
//! ```text
//! ┌──────────────┐    origins    ┌───────────────┐    RgbImage    ┌──────────┐
//! │   TileGrid   │ ────────────► │ TileExtractor │ ─────────────► │ TileSink │
//! │ (mask walk)  │               │ read+resample │   (parallel)   │ dir/mem  │
//! └──────────────┘               └───────────────┘                └──────────┘
//! ```
//!
//! # Components
//!
//! - [`TileGrid`]: lazy, restartable walk of tile origins whose center lies on tissue
//! - [`TileExtractor`]: reads `extract_size` squares at level 0 and resamples them to `tile_size`
//! - [`TileSink`]: destination for tiles; [`DirectorySink`] writes `{y}_{x}.png`,
//!   [`MemorySink`] keeps them in memory

mod extract;
mod grid;

pub use extract::{
    resample, DirectorySink, ExtractionSummary, MemorySink, TileExtractor, TileSink,
};
pub use grid::{TileGrid, TileOrigins};
