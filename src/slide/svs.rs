//! Aperio SVS and tiled pyramidal TIFF reader.
//!
//! SVS files are TIFF containers where each full-resolution or reduced
//! level is a tiled, JPEG-compressed IFD. Tiles are usually abbreviated
//! JPEG streams whose quantization and Huffman tables live once per level
//! in the JPEGTables tag.
//!
//! ```text
//!   read_region(origin, level, size)
//!        │
//!        ├─► tiles overlapping the region
//!        │       │
//!        │       ├─► LRU hit ──────────────────────────┐
//!        │       └─► read bytes ─► merge tables ─► decode ─┤
//!        │                                              ▼
//!        └────────────────────────── paste into white canvas
//! ```
//!
//! Stripped IFDs (label, macro, thumbnail) and tiled IFDs using other
//! codecs are ignored.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use image::{imageops, ImageFormat, RgbImage};
use lru::LruCache;
use tracing::debug;

use crate::error::{SlideError, TiffError};
use crate::io::{FileRangeReader, RangeReader};

use super::blank_region;
use super::source::{
    PyramidLevel, PyramidSource, PROPERTY_MPP_X, PROPERTY_OBJECTIVE_POWER, PROPERTY_VENDOR,
};
use super::tiff::{tag, Ifd, TiffHeader, COMPRESSION_JPEG};

/// Decoded tiles kept per slide.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 512;

/// Property key holding the raw ImageDescription of the first IFD.
pub const PROPERTY_COMMENT: &str = "openslide.comment";

// =============================================================================
// Metadata
// =============================================================================

/// Metadata recovered from an Aperio ImageDescription.
///
/// ```text
/// Aperio Image Library v12.0.15
/// 46920x33600 (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.499
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    pub vendor: Option<String>,
    pub magnification: Option<f64>,
    pub mpp: Option<f64>,
    /// All `key = value` pairs, keyed without surrounding whitespace
    pub fields: HashMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();
        if description.starts_with("Aperio") {
            metadata.vendor = Some("aperio".to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.magnification = value.parse().ok(),
                _ => {}
            }
            metadata.fields.insert(key.to_string(), value.to_string());
        }

        metadata
    }

    /// Flatten into slide properties using the `openslide.*` / `aperio.*` keys.
    fn into_properties(self, description: &str) -> HashMap<String, String> {
        let mut properties: HashMap<String, String> = self
            .fields
            .into_iter()
            .map(|(k, v)| (format!("aperio.{}", k), v))
            .collect();
        properties.insert(PROPERTY_COMMENT.to_string(), description.to_string());
        if let Some(vendor) = self.vendor {
            properties.insert(PROPERTY_VENDOR.to_string(), vendor);
        }
        if let Some(mpp) = self.mpp {
            properties.insert(PROPERTY_MPP_X.to_string(), mpp.to_string());
        }
        if let Some(mag) = self.magnification {
            properties.insert(PROPERTY_OBJECTIVE_POWER.to_string(), mag.to_string());
        }
        properties
    }
}

// =============================================================================
// JPEG Tables
// =============================================================================

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Combine a level's JPEGTables with an abbreviated tile stream.
///
/// The tables segment is `SOI ... EOI`, the tile is `SOI ... EOI`; the
/// result is the tables without their EOI followed by the tile without its
/// SOI. Streams not shaped like that are returned unchanged.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.len() < 4 || !tables.ends_with(&EOI) || !tile.starts_with(&SOI) {
        return Bytes::copy_from_slice(tile);
    }
    let head = &tables[..tables.len() - 2];
    let body = &tile[2..];
    let mut out = BytesMut::with_capacity(head.len() + body.len());
    out.extend_from_slice(head);
    out.extend_from_slice(body);
    out.freeze()
}

// =============================================================================
// Levels
// =============================================================================

#[derive(Debug, Clone)]
struct TiledLevel {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_x: u32,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    jpeg_tables: Option<Bytes>,
}

impl TiledLevel {
    /// Build a level from a tiled JPEG IFD, or `None` if the IFD is not one.
    fn from_ifd<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
    ) -> Result<Option<Self>, TiffError> {
        if !ifd.is_tiled() {
            return Ok(None);
        }
        let compression = ifd.scalar(reader, header, tag::COMPRESSION)?;
        if compression != Some(COMPRESSION_JPEG) {
            debug!(?compression, "Skipping tiled IFD with unsupported compression");
            return Ok(None);
        }

        let required = |t: u16, name: &'static str| -> Result<u32, TiffError> {
            let value = ifd
                .scalar(reader, header, t)?
                .ok_or(TiffError::MissingTag(name))?;
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or(TiffError::InvalidTagValue {
                    tag: name,
                    message: format!("value {} out of range", value),
                })
        };

        let width = required(tag::IMAGE_WIDTH, "ImageWidth")?;
        let height = required(tag::IMAGE_LENGTH, "ImageLength")?;
        let tile_width = required(tag::TILE_WIDTH, "TileWidth")?;
        let tile_height = required(tag::TILE_LENGTH, "TileLength")?;

        let tiles_x = width.div_ceil(tile_width);
        let tiles_y = height.div_ceil(tile_height);
        let tile_count = tiles_x as usize * tiles_y as usize;

        let offsets = ifd
            .get(tag::TILE_OFFSETS)
            .ok_or(TiffError::MissingTag("TileOffsets"))?
            .read_unsigned(reader, header)?;
        let byte_counts = ifd
            .get(tag::TILE_BYTE_COUNTS)
            .ok_or(TiffError::MissingTag("TileByteCounts"))?
            .read_unsigned(reader, header)?;

        if offsets.len() < tile_count || byte_counts.len() < tile_count {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {} tiles, found {} offsets and {} byte counts",
                    tile_count,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match ifd.get(tag::JPEG_TABLES) {
            Some(entry) => Some(entry.read_bytes(reader, header)?),
            None => None,
        };

        Ok(Some(Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x,
            offsets,
            byte_counts,
            jpeg_tables,
        }))
    }
}

// =============================================================================
// SvsSlide
// =============================================================================

type TileKey = (usize, u32, u32);

/// A tiled JPEG pyramid backed by a range reader.
pub struct SvsSlide<R: RangeReader = FileRangeReader> {
    reader: R,
    levels: Vec<TiledLevel>,
    infos: Vec<PyramidLevel>,
    properties: HashMap<String, String>,
    tile_cache: Mutex<LruCache<TileKey, Arc<RgbImage>>>,
}

impl SvsSlide<FileRangeReader> {
    /// Open a slide file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SlideError> {
        let reader = FileRangeReader::open(path)?;
        Self::from_reader(reader)
    }
}

impl<R: RangeReader> SvsSlide<R> {
    /// Parse the pyramid structure from any range reader.
    pub fn from_reader(reader: R) -> Result<Self, SlideError> {
        Self::with_cache_capacity(reader, DEFAULT_TILE_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(reader: R, capacity: usize) -> Result<Self, SlideError> {
        let header = TiffHeader::read(&reader)?;
        let ifds = Ifd::read_chain(&reader, &header)?;

        let description = match ifds.first().and_then(|ifd| ifd.get(tag::IMAGE_DESCRIPTION)) {
            Some(entry) => entry.read_string(&reader, &header)?,
            None => String::new(),
        };

        let mut levels = Vec::new();
        for ifd in &ifds {
            if let Some(level) = TiledLevel::from_ifd(&reader, &header, ifd)? {
                levels.push(level);
            }
        }
        if levels.is_empty() {
            return Err(TiffError::NoPyramidLevels.into());
        }
        levels.sort_by(|a, b| b.width.cmp(&a.width));

        let (base_w, base_h) = (levels[0].width as f64, levels[0].height as f64);
        let infos = levels
            .iter()
            .enumerate()
            .map(|(index, l)| PyramidLevel {
                index,
                width: l.width,
                height: l.height,
                downsample: (base_w / l.width as f64 + base_h / l.height as f64) / 2.0,
            })
            .collect();

        let properties = SvsMetadata::parse(&description).into_properties(&description);
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        debug!(
            slide = reader.identifier(),
            levels = levels.len(),
            width = levels[0].width,
            height = levels[0].height,
            "Opened tiled slide"
        );

        Ok(Self {
            reader,
            levels,
            infos,
            properties,
            tile_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Fetch a decoded tile, consulting the cache first.
    fn tile(&self, level: usize, tx: u32, ty: u32) -> Result<Arc<RgbImage>, SlideError> {
        let key = (level, tx, ty);
        {
            let mut cache = self.tile_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(tile) = cache.get(&key) {
                return Ok(Arc::clone(tile));
            }
        }

        let data = &self.levels[level];
        let index = (ty * data.tiles_x + tx) as usize;
        let raw = self
            .reader
            .read_exact_at(data.offsets[index], data.byte_counts[index] as usize)?;
        let jpeg = match &data.jpeg_tables {
            Some(tables) => merge_jpeg_tables(tables, &raw),
            None => raw,
        };

        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| SlideError::Decode {
                message: format!("tile ({}, {}) of level {}: {}", tx, ty, level, e),
            })?
            .to_rgb8();

        let tile = Arc::new(decoded);
        self.tile_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, Arc::clone(&tile));
        Ok(tile)
    }
}

impl<R: RangeReader> PyramidSource for SvsSlide<R> {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level(&self, index: usize) -> Option<PyramidLevel> {
        self.infos.get(index).copied()
    }

    fn read_region(
        &self,
        origin: (u32, u32),
        level: usize,
        size: (u32, u32),
    ) -> Result<RgbImage, SlideError> {
        let (data, info) = match (self.levels.get(level), self.infos.get(level)) {
            (Some(data), Some(info)) => (data, info),
            _ => {
                return Err(SlideError::InvalidLevel {
                    level,
                    level_count: self.levels.len(),
                })
            }
        };

        let mut region = blank_region(size.0, size.1);

        // Region in level pixel coordinates, clipped to the level.
        let x0 = (origin.0 as f64 / info.downsample).floor() as u64;
        let y0 = (origin.1 as f64 / info.downsample).floor() as u64;
        let x1 = (x0 + size.0 as u64).min(data.width as u64);
        let y1 = (y0 + size.1 as u64).min(data.height as u64);
        if x0 >= x1 || y0 >= y1 {
            return Ok(region);
        }

        let (tw, th) = (data.tile_width as u64, data.tile_height as u64);
        for ty in (y0 / th)..=((y1 - 1) / th) {
            for tx in (x0 / tw)..=((x1 - 1) / tw) {
                let tile = self.tile(level, tx as u32, ty as u32)?;

                // Edge tiles carry padding past the level bounds.
                let valid_w = (data.width as u64 - tx * tw).min(tw) as u32;
                let valid_h = (data.height as u64 - ty * th).min(th) as u32;
                let dx = (tx * tw) as i64 - x0 as i64;
                let dy = (ty * th) as i64 - y0 as i64;

                if valid_w >= tile.width() && valid_h >= tile.height() {
                    imageops::replace(&mut region, tile.as_ref(), dx, dy);
                } else {
                    let cropped = imageops::crop_imm(
                        tile.as_ref(),
                        0,
                        0,
                        valid_w.min(tile.width()),
                        valid_h.min(tile.height()),
                    )
                    .to_image();
                    imageops::replace(&mut region, &cropped, dx, dy);
                }
            }
        }

        Ok(region)
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }
}
