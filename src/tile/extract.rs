//! Tile extraction: read, resample and hand tiles to a sink.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::TilingConfig;
use crate::error::{SlideError, TileError};
use crate::grid::TileCoord;
use crate::slide::PyramidSource;

use super::grid::TileGrid;

// =============================================================================
// Sinks
// =============================================================================

/// Destination for extracted tiles, keyed by tile origin.
///
/// Called concurrently from the extraction workers; every key is written once.
pub trait TileSink: Send + Sync {
    fn write(&self, coord: TileCoord, tile: &RgbImage) -> Result<(), TileError>;
}

/// Writes tiles as `{y}_{x}.png` into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create the directory if needed.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, TileError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| TileError::Sink {
            key: dir.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, coord: TileCoord) -> PathBuf {
        self.dir.join(format!("{}.png", coord))
    }
}

impl TileSink for DirectorySink {
    fn write(&self, coord: TileCoord, tile: &RgbImage) -> Result<(), TileError> {
        tile.save_with_format(self.path_for(coord), ImageFormat::Png)
            .map_err(|e| TileError::Sink {
                key: coord.to_string(),
                message: e.to_string(),
            })
    }
}

/// Keeps tiles in memory, ordered by coordinate.
#[derive(Debug, Default)]
pub struct MemorySink {
    tiles: Mutex<BTreeMap<TileCoord, RgbImage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_tiles(self) -> BTreeMap<TileCoord, RgbImage> {
        self.tiles.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl TileSink for MemorySink {
    fn write(&self, coord: TileCoord, tile: &RgbImage) -> Result<(), TileError> {
        self.tiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(coord, tile.clone());
        Ok(())
    }
}

// =============================================================================
// Resampling
// =============================================================================

/// Bring an `extract_size` square back to `tile_size`.
///
/// Shrinking averages pixel areas; enlarging uses cubic interpolation.
pub fn resample(region: RgbImage, tile_size: u32) -> RgbImage {
    let side = region.width();
    if side == tile_size && region.height() == tile_size {
        region
    } else if side > tile_size {
        imageops::thumbnail(&region, tile_size, tile_size)
    } else {
        imageops::resize(&region, tile_size, tile_size, FilterType::CatmullRom)
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Reads classifier-ready tiles from a slide.
pub struct TileExtractor<'s> {
    source: &'s dyn PyramidSource,
    tile_size: u32,
    extract_size: u32,
}

/// Outcome of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub tiles: usize,
    pub extract_size: u32,
    pub tile_size: u32,
}

impl<'s> TileExtractor<'s> {
    /// Size tiles from the slide's objective power.
    pub fn new(source: &'s dyn PyramidSource, config: &TilingConfig) -> Result<Self, SlideError> {
        let magnification = source.objective_power()?;
        Ok(Self::with_sizes(
            source,
            config.tile_size,
            config.extract_size(magnification),
        ))
    }

    pub fn with_sizes(source: &'s dyn PyramidSource, tile_size: u32, extract_size: u32) -> Self {
        Self {
            source,
            tile_size,
            extract_size,
        }
    }

    pub fn extract_size(&self) -> u32 {
        self.extract_size
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Read one tile at full resolution and resample it.
    pub fn read_tile(&self, origin: TileCoord) -> Result<RgbImage, SlideError> {
        let region = self.source.read_region(
            (origin.x as u32, origin.y as u32),
            0,
            (self.extract_size, self.extract_size),
        )?;
        Ok(resample(region, self.tile_size))
    }

    /// Lazily read the tiles of `grid`, one at a time, in grid order.
    pub fn tiles<'e>(
        &'e self,
        grid: &'e TileGrid<'e>,
    ) -> impl Iterator<Item = Result<(TileCoord, RgbImage), SlideError>> + 'e {
        grid.iter()
            .map(move |origin| self.read_tile(origin).map(|tile| (origin, tile)))
    }

    /// Extract every tile of `grid` in parallel and write it to `sink`.
    pub fn extract_to(
        &self,
        grid: &TileGrid<'_>,
        sink: &dyn TileSink,
    ) -> Result<ExtractionSummary, TileError> {
        let origins = grid.origins();
        debug!(
            tiles = origins.len(),
            extract_size = self.extract_size,
            tile_size = self.tile_size,
            "Extracting tiles"
        );

        origins.par_iter().try_for_each(|&origin| {
            let tile = self.read_tile(origin)?;
            sink.write(origin, &tile)
        })?;

        info!(tiles = origins.len(), "Tiles extracted");
        Ok(ExtractionSummary {
            tiles: origins.len(),
            extract_size: self.extract_size,
            tile_size: self.tile_size,
        })
    }
}
